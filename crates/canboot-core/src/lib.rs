//! canboot-core: host side of a CAN bus bootloader update protocol.
//!
//! Pushes a firmware image to a microcontroller bootloader one 4-byte word
//! at a time and verifies the result by comparing CRC32 values.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Protocol**: Command codes, identifier layout, frame type
//! - **Checksum**: CRC32 used on both ends
//! - **Transport**: Bus abstraction (SocketCAN, mock)
//! - **Correlator**: Matches inbound replies to the outstanding command
//! - **Payload**: Image loading and word chunking
//! - **Events**: Observer pattern for UI decoupling
//! - **Uploader**: High-level orchestrator
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use canboot_core::{FirmwareImage, MockTransport, Uploader, UploaderConfig};
//!
//! let transport = Arc::new(MockTransport::new());
//! let mut uploader = Uploader::new(transport, &UploaderConfig::default())?;
//!
//! let image = FirmwareImage::load("app.bin")?;
//! let report = uploader.upload(image.bytes())?;
//! println!("verified 0x{:08X}", report.crc);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod checksum;
pub mod config;
pub mod correlator;
pub mod events;
pub mod payload;
pub mod protocol;
pub mod transport;
pub mod uploader;

// Re-exports for convenience
pub use checksum::crc32;
pub use config::UploaderConfig;
pub use correlator::{CorrelatorError, Outcome, PendingReply, ReplyKind, ResponseCorrelator};
pub use events::{
    FrameDirection, NullObserver, TracingObserver, UploadEvent, UploadObserver, UploadPhase,
};
pub use payload::{Chunk, FirmwareImage, ImageError, TransferJob};
pub use protocol::{Address, Command, Frame, FrameError, Reply};
#[cfg(all(feature = "socketcan", target_os = "linux"))]
pub use transport::SocketCanTransport;
pub use transport::{BusTransport, FrameSink, MockReply, MockTransport, TransportError};
pub use uploader::{ApplicationStatus, Step, UploadError, UploadReport, Uploader};
