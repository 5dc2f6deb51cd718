//! CRC32 over firmware images.
//!
//! The node verifies its application area with the standard reflected CRC32
//! (poly `0xEDB88320`, init `0xFFFFFFFF`, final complement), which is the
//! `CRC_32_ISO_HDLC` entry of the `crc` catalogue.

use crc::{CRC_32_ISO_HDLC, Crc};

pub static CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// CRC32 of `data` in one shot.
pub fn crc32(data: &[u8]) -> u32 {
    CRC32.checksum(data)
}
