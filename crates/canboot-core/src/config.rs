//! Uploader configuration.

use std::time::Duration;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

use crate::protocol::constants::*;

/// Configuration for an upload session, loadable from TOML.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploaderConfig {
    /// CAN interface name.
    pub interface: String,
    /// Target node ID (0..=0x0F).
    pub node_id: u8,
    /// Acknowledgement timeout in milliseconds.
    pub ack_timeout_ms: u64,
    /// CRC reply timeout in milliseconds.
    pub checksum_timeout_ms: u64,
    /// Bytes between progress events.
    pub progress_interval: usize,
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            interface: DEFAULT_INTERFACE.to_string(),
            node_id: DEFAULT_NODE_ID,
            ack_timeout_ms: ACK_TIMEOUT_MS,
            checksum_timeout_ms: CRC_TIMEOUT_MS,
            progress_interval: PROGRESS_INTERVAL,
        }
    }
}

impl UploaderConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: UploaderConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.node_id > MAX_ADDRESSABLE_NODE_ID {
            bail!(
                "Node ID must be between 0 and 0x{:02X} so identifiers fit in 11 bits, got 0x{:02X}",
                MAX_ADDRESSABLE_NODE_ID,
                self.node_id
            );
        }
        if self.progress_interval == 0 {
            bail!("progress_interval must be non-zero");
        }
        Ok(())
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn checksum_timeout(&self) -> Duration {
        Duration::from_millis(self.checksum_timeout_ms)
    }
}
