//! Command and reply codes.

use std::fmt;

use super::constants::*;

/// Commands sent from the host to the bootloader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    /// Erase the application flash area.
    Erase = CMD_ERASE,
    /// Prepare the node for a sequence of data words.
    BeginWrite = CMD_BEGIN_WRITE,
    /// Program one 4-byte word.
    WriteData = CMD_WRITE_DATA,
    /// Finish the write sequence.
    EndWrite = CMD_END_WRITE,
    /// Ask the node for the CRC32 of its application area.
    RequestCrc = CMD_REQUEST_CRC,
}

impl Command {
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Human readable description used in logs.
    pub fn description(self) -> &'static str {
        match self {
            Command::Erase => "Erase flash",
            Command::BeginWrite => "Start write",
            Command::WriteData => "Write data",
            Command::EndWrite => "End write",
            Command::RequestCrc => "Request CRC",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:02X})", self.description(), self.code())
    }
}

/// Reply codes sent from the bootloader back to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// Status reply, byte 0 is `0xFF` on success.
    Ack,
    /// CRC32 of the application area, big-endian in bytes 0..4.
    Crc,
    /// Anything else the node chooses to report.
    Other(u8),
}

impl Reply {
    pub fn from_code(code: u8) -> Self {
        match code {
            REPLY_ACK => Reply::Ack,
            REPLY_CRC => Reply::Crc,
            other => Reply::Other(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_codes() {
        assert_eq!(Command::Erase.code(), 0x01);
        assert_eq!(Command::BeginWrite.code(), 0x02);
        assert_eq!(Command::WriteData.code(), 0x03);
        assert_eq!(Command::EndWrite.code(), 0x04);
        assert_eq!(Command::RequestCrc.code(), 0x05);
    }

    #[test]
    fn test_reply_classification() {
        assert_eq!(Reply::from_code(0x11), Reply::Ack);
        assert_eq!(Reply::from_code(0x12), Reply::Crc);
        assert_eq!(Reply::from_code(0x20), Reply::Other(0x20));
    }

    #[test]
    fn test_display() {
        assert_eq!(Command::Erase.to_string(), "Erase flash (0x01)");
    }
}
