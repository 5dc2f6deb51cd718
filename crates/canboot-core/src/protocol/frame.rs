//! Bus frame layout.
//!
//! A bootloader frame uses an 11-bit standard identifier that carries both
//! the target node and the command:
//!
//! ```text
//!  10      7 6           0
//! +---------+-------------+
//! | node_id |   command   |
//! +---------+-------------+
//! ```
//!
//! The payload is copied verbatim; padding is the caller's concern.

use std::fmt;

use embedded_can::{Id, StandardId};
use thiserror::Error;

use super::constants::*;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Command 0x{command:02X} does not fit the 7-bit command field")]
    InvalidAddress { command: u8 },

    #[error("Node ID 0x{node_id:02X} out of range")]
    InvalidNodeId { node_id: u8 },

    #[error("Identifier 0x{id:03X} exceeds the 11-bit standard range")]
    IdentifierOutOfRange { id: u16 },

    #[error("Payload too long: {len} bytes (max {max})", max = MAX_PAYLOAD_LEN)]
    PayloadTooLong { len: usize },
}

/// Node and command packed into a bus identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address {
    node_id: u8,
    command: u8,
}

impl Address {
    pub fn new(node_id: u8, command: u8) -> Result<Self, FrameError> {
        if command > MAX_COMMAND {
            return Err(FrameError::InvalidAddress { command });
        }
        if node_id > MAX_NODE_ID {
            return Err(FrameError::InvalidNodeId { node_id });
        }
        Ok(Self { node_id, command })
    }

    /// Decode an identifier. Every identifier maps to some address.
    pub fn from_raw_id(id: u16) -> Self {
        Self {
            node_id: (id >> NODE_ID_SHIFT) as u8,
            command: (id & COMMAND_MASK) as u8,
        }
    }

    /// `(node_id << 7) | command`
    pub fn raw_id(&self) -> u16 {
        ((self.node_id as u16) << NODE_ID_SHIFT) | self.command as u16
    }

    pub fn node_id(&self) -> u8 {
        self.node_id
    }

    pub fn command(&self) -> u8 {
        self.command
    }
}

/// A single bus frame: standard identifier plus up to 8 data bytes.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    id: StandardId,
    data: [u8; MAX_PAYLOAD_LEN],
    len: u8,
}

impl Frame {
    /// Build a frame addressed to `address`.
    pub fn new(address: Address, payload: &[u8]) -> Result<Self, FrameError> {
        Self::from_raw(address.raw_id(), payload)
    }

    /// Build a frame from a raw identifier, as received from the bus.
    pub fn from_raw(raw_id: u16, payload: &[u8]) -> Result<Self, FrameError> {
        let id = StandardId::new(raw_id).ok_or(FrameError::IdentifierOutOfRange { id: raw_id })?;
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(FrameError::PayloadTooLong { len: payload.len() });
        }
        let mut data = [0u8; MAX_PAYLOAD_LEN];
        data[..payload.len()].copy_from_slice(payload);
        Ok(Self {
            id,
            data,
            len: payload.len() as u8,
        })
    }

    pub fn raw_id(&self) -> u16 {
        self.id.as_raw()
    }

    pub fn address(&self) -> Address {
        Address::from_raw_id(self.raw_id())
    }

    pub fn payload(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let address = self.address();
        write!(
            f,
            "Frame(id=0x{:03X} node=0x{:02X} cmd=0x{:02X} data={:02X?})",
            self.raw_id(),
            address.node_id(),
            address.command(),
            self.payload()
        )
    }
}

impl embedded_can::Frame for Frame {
    fn new(id: impl Into<Id>, data: &[u8]) -> Option<Self> {
        match id.into() {
            Id::Standard(id) => Frame::from_raw(id.as_raw(), data).ok(),
            Id::Extended(_) => None,
        }
    }

    /// The bootloader never uses remote frames.
    fn new_remote(_id: impl Into<Id>, _dlc: usize) -> Option<Self> {
        None
    }

    fn is_extended(&self) -> bool {
        false
    }

    fn is_remote_frame(&self) -> bool {
        false
    }

    fn id(&self) -> Id {
        Id::Standard(self.id)
    }

    fn dlc(&self) -> usize {
        self.len as usize
    }

    fn data(&self) -> &[u8] {
        self.payload()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_encoding() {
        let addr = Address::new(0x01, 0x03).unwrap();
        assert_eq!(addr.raw_id(), 0x83);

        let addr = Address::new(0x1F, 0x7F).unwrap();
        assert_eq!(addr.raw_id(), 0xFFF);

        let addr = Address::new(0x00, 0x00).unwrap();
        assert_eq!(addr.raw_id(), 0x000);
    }

    #[test]
    fn test_address_rejects_wide_command() {
        assert_eq!(
            Address::new(0x01, 0x80),
            Err(FrameError::InvalidAddress { command: 0x80 })
        );
        assert_eq!(
            Address::new(0x20, 0x01),
            Err(FrameError::InvalidNodeId { node_id: 0x20 })
        );
    }

    #[test]
    fn test_address_decoding() {
        let addr = Address::from_raw_id(0x091);
        assert_eq!(addr.node_id(), 0x01);
        assert_eq!(addr.command(), 0x11);

        let addr = Address::from_raw_id(0x392);
        assert_eq!(addr.node_id(), 0x07);
        assert_eq!(addr.command(), 0x12);
        assert_eq!(addr.raw_id(), 0x392);
    }

    #[test]
    fn test_frame_payload() {
        let addr = Address::new(0x02, REPLY_ACK).unwrap();
        let frame = Frame::new(addr, &[0xFF, 0x00, 0x00]).unwrap();
        assert_eq!(frame.raw_id(), 0x111);
        assert_eq!(frame.payload(), &[0xFF, 0x00, 0x00]);
        assert_eq!(frame.address(), addr);

        let empty = Frame::new(addr, &[]).unwrap();
        assert!(empty.payload().is_empty());
    }

    #[test]
    fn test_frame_rejects_long_payload() {
        let addr = Address::new(0x01, CMD_WRITE_DATA).unwrap();
        assert_eq!(
            Frame::new(addr, &[0u8; 9]),
            Err(FrameError::PayloadTooLong { len: 9 })
        );
        assert!(Frame::new(addr, &[0u8; 8]).is_ok());
    }

    #[test]
    fn test_frame_rejects_wide_identifier() {
        // Node IDs above 0x0F push the identifier past 11 bits.
        let addr = Address::new(0x10, CMD_ERASE).unwrap();
        assert_eq!(
            Frame::new(addr, &[]),
            Err(FrameError::IdentifierOutOfRange { id: 0x801 })
        );
    }

    #[test]
    fn test_embedded_can_frame() {
        use embedded_can::Frame as _;

        let id = StandardId::new(0x085).unwrap();
        let frame = <Frame as embedded_can::Frame>::new(id, &[1, 2, 3, 4]).unwrap();
        assert_eq!(frame.dlc(), 4);
        assert_eq!(frame.data(), &[1, 2, 3, 4]);
        assert!(frame.is_standard());
        assert!(frame.is_data_frame());

        let ext = embedded_can::ExtendedId::new(0x1234).unwrap();
        assert!(<Frame as embedded_can::Frame>::new(ext, &[]).is_none());
    }
}
