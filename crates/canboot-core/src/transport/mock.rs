//! Mock bus transport for testing.
//!
//! Every transmitted frame is captured and answered from a scripted reply
//! queue, which stands in for the node on the other end of the bus.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use super::traits::{BusTransport, FrameSink, TransportError};
use crate::protocol::constants::{ACK_STATUS_OK, DEFAULT_NODE_ID, REPLY_ACK, REPLY_CRC};
use crate::protocol::{Address, Frame, FrameError};

/// Scripted answer to one transmitted frame.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Deliver this frame to the receiver.
    Frame(Frame),
    /// Stay quiet, letting the caller time out.
    Silence,
}

/// Mock transport for unit testing uploader and correlator logic.
pub struct MockTransport {
    /// Queued replies, one popped per transmit.
    replies: Mutex<VecDeque<MockReply>>,
    /// Captured transmissions.
    sent: Mutex<Vec<Frame>>,
    /// Registered inbound handler.
    receiver: Mutex<Option<Arc<dyn FrameSink>>>,
    /// Deliver replies from a background thread after this delay.
    reply_delay: Option<Duration>,
    /// Node ID used for reply identifiers.
    node_id: u8,
    /// Whether the bus is "connected".
    connected: Mutex<bool>,
}

impl MockTransport {
    /// Replies are delivered inline, before `transmit` returns.
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
            receiver: Mutex::new(None),
            reply_delay: None,
            node_id: DEFAULT_NODE_ID,
            connected: Mutex::new(true),
        }
    }

    /// Replies are delivered from a separate thread after `delay`.
    pub fn with_reply_delay(delay: Duration) -> Self {
        Self {
            reply_delay: Some(delay),
            ..Self::new()
        }
    }

    /// Queue a scripted reply for the next transmit.
    pub fn queue_reply(&self, reply: MockReply) {
        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(reply);
    }

    /// Queue an acknowledgement with the given status byte.
    pub fn queue_ack(&self, status: u8) {
        if let Ok(frame) = self.reply_frame(REPLY_ACK, &[status, 0x00, 0x00]) {
            self.queue_reply(MockReply::Frame(frame));
        }
    }

    /// Queue a successful acknowledgement.
    pub fn queue_confirm(&self) {
        self.queue_ack(ACK_STATUS_OK);
    }

    /// Queue `count` successful acknowledgements.
    pub fn queue_confirms(&self, count: usize) {
        for _ in 0..count {
            self.queue_confirm();
        }
    }

    /// Queue a CRC reply.
    pub fn queue_crc(&self, crc: u32) {
        if let Ok(frame) = self.reply_frame(REPLY_CRC, &crc.to_be_bytes()) {
            self.queue_reply(MockReply::Frame(frame));
        }
    }

    /// Queue a transmit that gets no answer.
    pub fn queue_silence(&self) {
        self.queue_reply(MockReply::Silence);
    }

    /// Deliver an unsolicited frame to the receiver right now.
    pub fn inject(&self, frame: Frame) {
        if let Some(sink) = self.current_receiver() {
            sink.on_frame(&frame);
        }
    }

    /// Build a frame as the node would send it.
    pub fn reply_frame(&self, command: u8, payload: &[u8]) -> Result<Frame, FrameError> {
        Frame::new(Address::new(self.node_id, command)?, payload)
    }

    /// Get all captured transmissions.
    pub fn sent_frames(&self) -> Vec<Frame> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Command codes of all captured transmissions, in order.
    pub fn sent_commands(&self) -> Vec<u8> {
        self.sent_frames()
            .iter()
            .map(|frame| frame.address().command())
            .collect()
    }

    /// Clear captured transmissions.
    pub fn clear_sent(&self) {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Number of scripted replies not yet consumed.
    pub fn pending_replies(&self) -> usize {
        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Simulate losing the bus.
    pub fn disconnect(&self) {
        *self.connected.lock().unwrap_or_else(PoisonError::into_inner) = false;
    }

    /// Simulate the bus coming back.
    pub fn reconnect(&self) {
        *self.connected.lock().unwrap_or_else(PoisonError::into_inner) = true;
    }

    fn current_receiver(&self) -> Option<Arc<dyn FrameSink>> {
        self.receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl BusTransport for MockTransport {
    fn transmit(&self, frame: &Frame) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(*frame);

        let reply = self
            .replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();

        let (Some(MockReply::Frame(reply)), Some(sink)) = (reply, self.current_receiver()) else {
            return Ok(());
        };

        match self.reply_delay {
            None => sink.on_frame(&reply),
            Some(delay) => {
                thread::spawn(move || {
                    thread::sleep(delay);
                    sink.on_frame(&reply);
                });
            }
        }
        Ok(())
    }

    fn set_receiver(&self, sink: Arc<dyn FrameSink>) {
        *self.receiver.lock().unwrap_or_else(PoisonError::into_inner) = Some(sink);
    }

    fn is_connected(&self) -> bool {
        *self.connected.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
