//! Transport layer module.

pub mod mock;
#[cfg(all(feature = "socketcan", target_os = "linux"))]
pub mod socketcan;
pub mod traits;

pub use mock::{MockReply, MockTransport};
#[cfg(all(feature = "socketcan", target_os = "linux"))]
pub use self::socketcan::SocketCanTransport;
pub use traits::{BusTransport, FrameSink, TransportError};
