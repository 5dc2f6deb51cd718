//! Bootloader protocol constants.

// Identifier layout: (node_id << 7) | command
pub const NODE_ID_SHIFT: u16 = 7;
pub const COMMAND_MASK: u16 = 0x7F;
pub const MAX_COMMAND: u8 = 0x7F;
pub const MAX_NODE_ID: u8 = 0x1F;
pub const MAX_STANDARD_ID: u16 = 0x7FF;
/// Highest node whose identifiers all fit in 11 bits.
pub const MAX_ADDRESSABLE_NODE_ID: u8 = (MAX_STANDARD_ID >> NODE_ID_SHIFT) as u8;
pub const DEFAULT_NODE_ID: u8 = 0x01;

pub const MAX_PAYLOAD_LEN: usize = 8;

// Host -> node commands
pub const CMD_ERASE: u8 = 0x01;
pub const CMD_BEGIN_WRITE: u8 = 0x02;
pub const CMD_WRITE_DATA: u8 = 0x03;
pub const CMD_END_WRITE: u8 = 0x04;
pub const CMD_REQUEST_CRC: u8 = 0x05;

// Node -> host replies
pub const REPLY_ACK: u8 = 0x11;
pub const REPLY_CRC: u8 = 0x12;

pub const ACK_STATUS_OK: u8 = 0xFF;
pub const ACK_REPLY_MIN_LEN: usize = 3;
pub const CRC_REPLY_MIN_LEN: usize = 4;

// Data transfer
pub const WORD_SIZE: usize = 4;
pub const FILL_BYTE: u8 = 0xFF;
pub const PROGRESS_INTERVAL: usize = 1024;

// Timeouts (ms). Erase is slow on the node, so acks get the long one.
pub const ACK_TIMEOUT_MS: u64 = 10_000;
pub const CRC_TIMEOUT_MS: u64 = 1_000;

/// CRC reported by a node whose application area is still erased.
pub const ERASED_CRC: u32 = 0xFFFF_FFFF;

// Application flash layout of the reference node.
pub const APP_START: u32 = 0x0800_8000;
pub const APP_END: u32 = 0x080C_0000;
pub const FLASH_SIZE_KB: u32 = 1024;
pub const RAM_SIZE_KB: u32 = 256;

pub const DEFAULT_INTERFACE: &str = "can0";
