//! Bus transport abstraction.
//!
//! Defines the `BusTransport` trait for frame I/O, allowing different
//! implementations (SocketCAN, mock, etc.). Inbound frames are pushed to a
//! registered `FrameSink` from the transport's own receive path.

use std::sync::Arc;

use thiserror::Error;

use crate::protocol::Frame;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Interface not found: {0}")]
    InterfaceNotFound(String),

    #[error("Failed to open interface {interface}: {message}")]
    OpenFailed { interface: String, message: String },

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Bus disconnected")]
    Disconnected,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Receiver of inbound frames.
///
/// Called from the transport's receive path for every frame, whether or not
/// anyone is waiting for it. Implementations must not block.
pub trait FrameSink: Send + Sync {
    fn on_frame(&self, frame: &Frame);
}

/// Abstract bus interface.
pub trait BusTransport: Send + Sync {
    /// Put one frame on the bus.
    fn transmit(&self, frame: &Frame) -> Result<(), TransportError>;

    /// Register the handler for inbound frames, replacing any previous one.
    fn set_receiver(&self, sink: Arc<dyn FrameSink>);

    /// Check if the bus is still usable.
    fn is_connected(&self) -> bool;
}

impl<T: BusTransport + ?Sized> BusTransport for Arc<T> {
    fn transmit(&self, frame: &Frame) -> Result<(), TransportError> {
        (**self).transmit(frame)
    }

    fn set_receiver(&self, sink: Arc<dyn FrameSink>) {
        (**self).set_receiver(sink)
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }
}
