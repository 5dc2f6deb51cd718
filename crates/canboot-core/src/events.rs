//! Event system for UI decoupling.
//!
//! Allows CLI or other front ends to follow an upload without tight
//! coupling to the core logic.

use std::fmt;

use crate::protocol::Frame;

/// Upload phases, in protocol order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UploadPhase {
    /// Nothing in progress.
    #[default]
    Idle,
    /// Erase command sent.
    Erasing,
    /// Begin-write command sent.
    BeginWrite,
    /// Data words being written.
    Writing,
    /// End-write command sent.
    EndWrite,
    /// Waiting for the node's CRC.
    Verifying,
    /// Upload verified.
    Done,
    /// Upload aborted.
    Failed,
}

impl fmt::Display for UploadPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadPhase::Idle => write!(f, "Idle"),
            UploadPhase::Erasing => write!(f, "Erasing"),
            UploadPhase::BeginWrite => write!(f, "Begin Write"),
            UploadPhase::Writing => write!(f, "Writing"),
            UploadPhase::EndWrite => write!(f, "End Write"),
            UploadPhase::Verifying => write!(f, "Verifying"),
            UploadPhase::Done => write!(f, "Done"),
            UploadPhase::Failed => write!(f, "Failed"),
        }
    }
}

/// Frame direction on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDirection {
    Tx, // Host -> Node
    Rx, // Node -> Host
}

impl fmt::Display for FrameDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameDirection::Tx => write!(f, "TX"),
            FrameDirection::Rx => write!(f, "RX"),
        }
    }
}

/// Events emitted by the uploader.
#[derive(Debug, Clone)]
pub enum UploadEvent {
    /// Phase changed.
    PhaseChanged { from: UploadPhase, to: UploadPhase },
    /// Frame put on or taken off the bus.
    Frame {
        direction: FrameDirection,
        frame: Frame,
    },
    /// Bytes written so far.
    Progress { current: usize, total: usize },
    /// Local and node CRC compared.
    ChecksumCompared { local: u32, remote: u32 },
    /// Step failed.
    Error { message: String },
    /// Upload verified.
    Complete { bytes: usize },
}

/// Observer trait for receiving upload events.
///
/// Implement this trait in your UI layer to receive updates. Frame events
/// for received replies are delivered on the bus receive thread.
pub trait UploadObserver: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &UploadEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl UploadObserver for NullObserver {
    fn on_event(&self, _event: &UploadEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl UploadObserver for TracingObserver {
    fn on_event(&self, event: &UploadEvent) {
        match event {
            UploadEvent::PhaseChanged { from, to } => {
                tracing::info!(from = %from, to = %to, "Phase changed");
            }
            UploadEvent::Frame { direction, frame } => {
                tracing::trace!(dir = %direction, frame = ?frame, "CAN frame");
            }
            UploadEvent::Progress { current, total } => {
                let pct = if *total > 0 {
                    (*current * 100) / *total
                } else {
                    100
                };
                tracing::info!(
                    current = current,
                    total = total,
                    progress = %format!("{}%", pct),
                    "Progress"
                );
            }
            UploadEvent::ChecksumCompared { local, remote } => {
                tracing::info!(
                    local = %format!("0x{:08X}", local),
                    remote = %format!("0x{:08X}", remote),
                    "CRC compared"
                );
            }
            UploadEvent::Error { message } => {
                tracing::error!("Error: {}", message);
            }
            UploadEvent::Complete { bytes } => {
                tracing::info!(bytes = bytes, "Upload complete");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_display() {
        assert_eq!(UploadPhase::default(), UploadPhase::Idle);
        assert_eq!(UploadPhase::BeginWrite.to_string(), "Begin Write");
        assert_eq!(UploadPhase::Verifying.to_string(), "Verifying");
        assert_eq!(FrameDirection::Rx.to_string(), "RX");
    }
}
