//! Reply correlation.
//!
//! The bootloader answers on the bus receive path, which runs independently
//! of the caller that sent the command. `ResponseCorrelator` bridges the two:
//! the caller arms a single expectation before transmitting, the receive path
//! feeds every inbound frame to [`ResponseCorrelator::handle_frame`], and the
//! caller blocks in [`PendingReply::wait`] until the expectation is resolved
//! or the deadline passes.
//!
//! Only one expectation may be armed at a time. Arming before the transmit
//! means a reply that arrives before the caller starts waiting is kept, and
//! clearing the slot on every exit means a reply that arrives after a timeout
//! is dropped instead of satisfying some later request.

use std::fmt;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use byteorder::{BigEndian, ByteOrder};
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

use crate::protocol::constants::*;
use crate::protocol::{Frame, Reply};
use crate::transport::FrameSink;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CorrelatorError {
    #[error("A {pending} reply is already pending")]
    RequestPending { pending: ReplyKind },
}

/// Which reply an armed expectation is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    /// Status reply (`0x11`).
    Acknowledgement,
    /// CRC value reply (`0x12`).
    Checksum,
}

impl ReplyKind {
    /// Default deadline. Acks cover flash erase, which is slow on the node.
    pub fn default_timeout(self) -> Duration {
        match self {
            ReplyKind::Acknowledgement => Duration::from_millis(ACK_TIMEOUT_MS),
            ReplyKind::Checksum => Duration::from_millis(CRC_TIMEOUT_MS),
        }
    }
}

impl fmt::Display for ReplyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplyKind::Acknowledgement => write!(f, "acknowledgement"),
            ReplyKind::Checksum => write!(f, "checksum"),
        }
    }
}

/// Result of one round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Node reported success.
    Confirmed,
    /// Node reported failure with this raw status byte.
    Rejected(u8),
    /// Node reported its application CRC.
    ChecksumReceived(u32),
    /// No matching reply before the deadline.
    TimedOut,
}

#[derive(Debug, Default)]
struct Slot {
    pending: Option<ReplyKind>,
    resolved: Option<Outcome>,
}

/// Single-slot correlator between sent commands and inbound replies.
#[derive(Debug, Default)]
pub struct ResponseCorrelator {
    slot: Mutex<Slot>,
    resolved: Condvar,
}

impl ResponseCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Arm an expectation. Call before transmitting the command.
    pub fn expect(&self, kind: ReplyKind) -> Result<PendingReply<'_>, CorrelatorError> {
        let mut slot = self.lock();
        if let Some(pending) = slot.pending {
            return Err(CorrelatorError::RequestPending { pending });
        }
        slot.pending = Some(kind);
        slot.resolved = None;
        trace!(kind = %kind, "Armed reply expectation");
        Ok(PendingReply {
            correlator: self,
            kind,
            armed: true,
        })
    }

    /// Arm an acknowledgement expectation.
    pub fn expect_acknowledgement(&self) -> Result<PendingReply<'_>, CorrelatorError> {
        self.expect(ReplyKind::Acknowledgement)
    }

    /// Arm a checksum expectation.
    pub fn expect_checksum(&self) -> Result<PendingReply<'_>, CorrelatorError> {
        self.expect(ReplyKind::Checksum)
    }

    /// Whether an expectation is currently armed.
    pub fn is_pending(&self) -> bool {
        self.lock().pending.is_some()
    }

    /// Classify an inbound frame and resolve the matching expectation.
    ///
    /// Called for every received frame. Replies nobody is waiting for are
    /// ignored; the node may report status on its own.
    pub fn handle_frame(&self, frame: &Frame) {
        let address = frame.address();
        let payload = frame.payload();
        debug!(
            node = address.node_id(),
            cmd = %format!("0x{:02X}", address.command()),
            dlc = payload.len(),
            "Frame received"
        );

        match Reply::from_code(address.command()) {
            Reply::Crc if payload.len() >= CRC_REPLY_MIN_LEN => {
                let crc = BigEndian::read_u32(&payload[..4]);
                debug!(crc = %format!("0x{:08X}", crc), "CRC received");
                self.resolve(ReplyKind::Checksum, Outcome::ChecksumReceived(crc));
            }
            Reply::Ack if payload.len() >= ACK_REPLY_MIN_LEN => {
                let status = payload[0];
                let outcome = if status == ACK_STATUS_OK {
                    debug!("Operation confirmed");
                    Outcome::Confirmed
                } else {
                    error!(status = %format!("0x{:02X}", status), "Operation failed");
                    Outcome::Rejected(status)
                };
                self.resolve(ReplyKind::Acknowledgement, outcome);
            }
            Reply::Crc | Reply::Ack => {
                warn!(?frame, "Reply too short, ignoring");
            }
            Reply::Other(code) => {
                info!(
                    node = %format!("0x{:X}", address.node_id()),
                    cmd = %format!("0x{:X}", code),
                    dlc = payload.len(),
                    "Response from node"
                );
            }
        }
    }

    fn resolve(&self, kind: ReplyKind, outcome: Outcome) {
        let mut slot = self.lock();
        if slot.pending != Some(kind) || slot.resolved.is_some() {
            debug!(kind = %kind, "No matching request pending, reply ignored");
            return;
        }
        slot.resolved = Some(outcome);
        drop(slot);
        self.resolved.notify_all();
    }
}

impl FrameSink for ResponseCorrelator {
    fn on_frame(&self, frame: &Frame) {
        self.handle_frame(frame);
    }
}

/// An armed expectation. Dropping it without waiting disarms it.
#[must_use = "an armed reply must be waited on"]
pub struct PendingReply<'a> {
    correlator: &'a ResponseCorrelator,
    kind: ReplyKind,
    armed: bool,
}

impl PendingReply<'_> {
    /// Block until the reply arrives or `timeout` elapses.
    pub fn wait(mut self, timeout: Duration) -> Outcome {
        let correlator = self.correlator;
        let slot = correlator.lock();
        let (mut slot, _) = correlator
            .resolved
            .wait_timeout_while(slot, timeout, |slot| slot.resolved.is_none())
            .unwrap_or_else(PoisonError::into_inner);

        let outcome = slot.resolved.take();
        slot.pending = None;
        self.armed = false;
        drop(slot);

        outcome.unwrap_or_else(|| {
            error!(kind = %self.kind, timeout_ms = timeout.as_millis() as u64, "Timeout waiting for reply");
            Outcome::TimedOut
        })
    }
}

impl Drop for PendingReply<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut slot = self.correlator.lock();
        slot.pending = None;
        slot.resolved = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Address;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    fn reply(command: u8, payload: &[u8]) -> Frame {
        Frame::new(Address::new(0x01, command).unwrap(), payload).unwrap()
    }

    fn ack(status: u8) -> Frame {
        reply(REPLY_ACK, &[status, 0x00, 0x00])
    }

    fn deliver_later(correlator: &Arc<ResponseCorrelator>, frame: Frame, delay: Duration) {
        let correlator = Arc::clone(correlator);
        thread::spawn(move || {
            thread::sleep(delay);
            correlator.handle_frame(&frame);
        });
    }

    #[test]
    fn test_ack_confirmed() {
        let correlator = Arc::new(ResponseCorrelator::new());
        let pending = correlator.expect_acknowledgement().unwrap();
        deliver_later(&correlator, ack(0xFF), Duration::from_millis(20));

        assert_eq!(pending.wait(Duration::from_secs(2)), Outcome::Confirmed);
        assert!(!correlator.is_pending());
    }

    #[test]
    fn test_ack_rejected_keeps_status() {
        let correlator = Arc::new(ResponseCorrelator::new());
        let pending = correlator.expect_acknowledgement().unwrap();
        deliver_later(&correlator, ack(0x03), Duration::from_millis(20));

        assert_eq!(pending.wait(Duration::from_secs(2)), Outcome::Rejected(0x03));
    }

    #[test]
    fn test_ack_timeout() {
        let correlator = ResponseCorrelator::new();
        let pending = correlator.expect_acknowledgement().unwrap();

        let start = Instant::now();
        assert_eq!(pending.wait(Duration::from_millis(50)), Outcome::TimedOut);
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert!(!correlator.is_pending());
    }

    #[test]
    fn test_wakes_promptly() {
        let correlator = Arc::new(ResponseCorrelator::new());
        let pending = correlator.expect_acknowledgement().unwrap();
        deliver_later(&correlator, ack(0xFF), Duration::from_millis(10));

        let start = Instant::now();
        assert_eq!(pending.wait(Duration::from_secs(10)), Outcome::Confirmed);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_checksum_big_endian() {
        let correlator = Arc::new(ResponseCorrelator::new());
        let pending = correlator.expect_checksum().unwrap();
        deliver_later(
            &correlator,
            reply(REPLY_CRC, &[0x12, 0x34, 0x56, 0x78]),
            Duration::from_millis(10),
        );

        assert_eq!(
            pending.wait(Duration::from_secs(2)),
            Outcome::ChecksumReceived(0x1234_5678)
        );
    }

    #[test]
    fn test_reply_before_wait_is_kept() {
        let correlator = ResponseCorrelator::new();
        let pending = correlator.expect_checksum().unwrap();
        correlator.handle_frame(&reply(REPLY_CRC, &[0xCA, 0xFE, 0xBA, 0xBE]));

        assert_eq!(
            pending.wait(Duration::from_millis(50)),
            Outcome::ChecksumReceived(0xCAFE_BABE)
        );
    }

    #[test]
    fn test_late_reply_does_not_leak() {
        let correlator = ResponseCorrelator::new();
        let pending = correlator.expect_acknowledgement().unwrap();
        assert_eq!(pending.wait(Duration::from_millis(20)), Outcome::TimedOut);

        // Arrives after the deadline, nobody is waiting.
        correlator.handle_frame(&ack(0xFF));

        let pending = correlator.expect_acknowledgement().unwrap();
        assert_eq!(pending.wait(Duration::from_millis(50)), Outcome::TimedOut);
    }

    #[test]
    fn test_single_slot() {
        let correlator = ResponseCorrelator::new();
        let first = correlator.expect_acknowledgement().unwrap();
        assert_eq!(
            correlator.expect_checksum().err(),
            Some(CorrelatorError::RequestPending {
                pending: ReplyKind::Acknowledgement
            })
        );
        drop(first);
        assert!(!correlator.is_pending());
        assert!(correlator.expect_checksum().is_ok());
    }

    #[test]
    fn test_wrong_kind_ignored() {
        let correlator = ResponseCorrelator::new();
        let pending = correlator.expect_checksum().unwrap();
        correlator.handle_frame(&ack(0xFF));

        assert_eq!(pending.wait(Duration::from_millis(50)), Outcome::TimedOut);
    }

    #[test]
    fn test_unsolicited_and_informational_ignored() {
        let correlator = ResponseCorrelator::new();
        correlator.handle_frame(&ack(0xFF));
        correlator.handle_frame(&reply(0x20, &[0x01]));
        assert!(!correlator.is_pending());

        let pending = correlator.expect_acknowledgement().unwrap();
        correlator.handle_frame(&reply(0x20, &[0xFF, 0x00, 0x00]));
        assert_eq!(pending.wait(Duration::from_millis(50)), Outcome::TimedOut);
    }

    #[test]
    fn test_short_replies_ignored() {
        let correlator = ResponseCorrelator::new();
        let pending = correlator.expect_checksum().unwrap();
        correlator.handle_frame(&reply(REPLY_CRC, &[0x12, 0x34, 0x56]));
        assert_eq!(pending.wait(Duration::from_millis(30)), Outcome::TimedOut);

        let pending = correlator.expect_acknowledgement().unwrap();
        correlator.handle_frame(&reply(REPLY_ACK, &[0xFF]));
        assert_eq!(pending.wait(Duration::from_millis(30)), Outcome::TimedOut);
    }

    #[test]
    fn test_first_resolution_wins() {
        let correlator = ResponseCorrelator::new();
        let pending = correlator.expect_acknowledgement().unwrap();
        correlator.handle_frame(&ack(0x01));
        correlator.handle_frame(&ack(0xFF));

        assert_eq!(pending.wait(Duration::from_millis(50)), Outcome::Rejected(0x01));
    }

    #[test]
    fn test_default_timeouts() {
        assert_eq!(
            ReplyKind::Acknowledgement.default_timeout(),
            Duration::from_millis(10_000)
        );
        assert_eq!(
            ReplyKind::Checksum.default_timeout(),
            Duration::from_millis(1_000)
        );
    }
}
