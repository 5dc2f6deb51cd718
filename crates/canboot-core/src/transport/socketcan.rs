//! SocketCAN transport (Linux).

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use socketcan::{CanFrame, CanSocket, EmbeddedFrame, Id, Socket, StandardId};
use tracing::{debug, info, instrument, trace, warn};

use super::traits::{BusTransport, FrameSink, TransportError};
use crate::protocol::Frame;

/// How long the receive thread blocks before re-checking for shutdown.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

type SharedSink = Arc<Mutex<Option<Arc<dyn FrameSink>>>>;

/// Raw CAN socket with a background receive thread.
pub struct SocketCanTransport {
    socket: Arc<CanSocket>,
    interface: String,
    receiver: SharedSink,
    running: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

impl SocketCanTransport {
    /// Open `interface` (e.g. `can0`) and start reading frames.
    #[instrument(level = "info")]
    pub fn open(interface: &str) -> Result<Self, TransportError> {
        let socket = CanSocket::open(interface).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => TransportError::InterfaceNotFound(interface.to_string()),
            _ => TransportError::OpenFailed {
                interface: interface.to_string(),
                message: e.to_string(),
            },
        })?;
        socket.set_read_timeout(POLL_INTERVAL)?;

        let socket = Arc::new(socket);
        let receiver: SharedSink = Arc::new(Mutex::new(None));
        let running = Arc::new(AtomicBool::new(true));

        let reader = {
            let socket = Arc::clone(&socket);
            let receiver = Arc::clone(&receiver);
            let running = Arc::clone(&running);
            thread::Builder::new()
                .name(format!("{}-rx", interface))
                .spawn(move || read_loop(&socket, &receiver, &running))?
        };

        info!(interface = %interface, "CAN interface ready");

        Ok(Self {
            socket,
            interface: interface.to_string(),
            receiver,
            running,
            reader: Some(reader),
        })
    }

}

fn read_loop(socket: &CanSocket, receiver: &SharedSink, running: &AtomicBool) {
    while running.load(Ordering::Acquire) {
        let raw = match socket.read_frame() {
            Ok(frame) => frame,
            Err(e) if is_transient(&e) => continue,
            Err(e) => {
                warn!(error = %e, "CAN read failed, stopping receiver");
                running.store(false, Ordering::Release);
                break;
            }
        };

        let Some(frame) = from_can_frame(&raw) else {
            trace!("Skipping non-bootloader frame");
            continue;
        };

        let sink = receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(sink) = sink {
            sink.on_frame(&frame);
        }
    }
    debug!("CAN receive thread exiting");
}

/// Read timeouts and signal interruptions leave the socket usable.
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}

/// Only standard data frames carry bootloader traffic.
fn from_can_frame(raw: &CanFrame) -> Option<Frame> {
    if raw.is_remote_frame() {
        return None;
    }
    match raw.id() {
        Id::Standard(id) => Frame::from_raw(id.as_raw(), raw.data()).ok(),
        Id::Extended(_) => None,
    }
}

fn to_can_frame(frame: &Frame) -> Result<CanFrame, TransportError> {
    let id = StandardId::new(frame.raw_id())
        .ok_or_else(|| TransportError::SendFailed(format!("bad identifier 0x{:03X}", frame.raw_id())))?;
    CanFrame::new(id, frame.payload())
        .ok_or_else(|| TransportError::SendFailed("payload does not fit a CAN frame".into()))
}

impl BusTransport for SocketCanTransport {
    fn transmit(&self, frame: &Frame) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }
        let raw = to_can_frame(frame)?;
        self.socket
            .write_frame(&raw)
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    fn set_receiver(&self, sink: Arc<dyn FrameSink>) {
        *self.receiver.lock().unwrap_or_else(PoisonError::into_inner) = Some(sink);
    }

    fn is_connected(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl Drop for SocketCanTransport {
    fn drop(&mut self) {
        debug!(interface = %self.interface, "Closing CAN interface");
        self.running.store(false, Ordering::Release);
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Address;
    use crate::protocol::constants::{CMD_WRITE_DATA, REPLY_ACK};

    #[test]
    fn test_standard_frame_round_trip() {
        let frame = Frame::new(Address::new(0x03, CMD_WRITE_DATA).unwrap(), &[1, 2, 3, 4]).unwrap();
        let raw = to_can_frame(&frame).unwrap();

        assert!(matches!(raw.id(), Id::Standard(id) if id.as_raw() == 0x183));
        assert_eq!(raw.data(), &[1, 2, 3, 4]);
        assert_eq!(from_can_frame(&raw), Some(frame));
    }

    #[test]
    fn test_reply_frame_converted() {
        let raw = CanFrame::new(StandardId::new(0x091).unwrap(), &[0xFF, 0x00, 0x00]).unwrap();
        let frame = from_can_frame(&raw).unwrap();

        assert_eq!(frame.address().node_id(), 0x01);
        assert_eq!(frame.address().command(), REPLY_ACK);
        assert_eq!(frame.payload(), &[0xFF, 0x00, 0x00]);
    }

    #[test]
    fn test_extended_frame_skipped() {
        let id = embedded_can::ExtendedId::new(0x0000_0091).unwrap();
        let raw = CanFrame::new(id, &[0xFF, 0x00, 0x00]).unwrap();
        assert_eq!(from_can_frame(&raw), None);
    }

    #[test]
    fn test_remote_frame_skipped() {
        let raw = CanFrame::new_remote(StandardId::new(0x091).unwrap(), 3).unwrap();
        assert_eq!(from_can_frame(&raw), None);
    }

    #[test]
    fn test_transient_read_errors() {
        assert!(is_transient(&io::Error::from(io::ErrorKind::Interrupted)));
        assert!(is_transient(&io::Error::from(io::ErrorKind::WouldBlock)));
        assert!(is_transient(&io::Error::from(io::ErrorKind::TimedOut)));
        assert!(!is_transient(&io::Error::from(io::ErrorKind::BrokenPipe)));
    }
}
