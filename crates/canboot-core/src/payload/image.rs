//! Firmware image loading.

use std::path::Path;

use thiserror::Error;
use tracing::info;

use crate::checksum::crc32;

#[derive(Error, Debug)]
pub enum ImageError {
    #[error("Firmware image is empty")]
    Empty,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Raw application binary to be written to the node.
#[derive(Debug, Clone)]
pub struct FirmwareImage {
    data: Vec<u8>,
    crc: u32,
}

impl FirmwareImage {
    /// Wrap raw bytes. An empty image has nothing to program.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self, ImageError> {
        if data.is_empty() {
            return Err(ImageError::Empty);
        }
        let crc = crc32(&data);
        Ok(Self { data, crc })
    }

    /// Read an image from disk.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ImageError> {
        let path = path.as_ref();
        let image = Self::from_bytes(std::fs::read(path)?)?;
        info!(
            path = %path.display(),
            size = image.len(),
            kb = %format!("{:.2}", image.len() as f64 / 1024.0),
            crc = %format!("0x{:08X}", image.crc()),
            "Firmware image loaded"
        );
        Ok(image)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// CRC32 over the unpadded image.
    pub fn crc(&self) -> u32 {
        self.crc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_image_rejected() {
        assert!(matches!(
            FirmwareImage::from_bytes(Vec::new()),
            Err(ImageError::Empty)
        ));
    }

    #[test]
    fn test_image_metadata() {
        let image = FirmwareImage::from_bytes(b"123456789".to_vec()).unwrap();
        assert_eq!(image.len(), 9);
        assert_eq!(image.crc(), 0xCBF4_3926);
        assert_eq!(image.bytes(), b"123456789");
    }

    #[test]
    fn test_load_missing_file() {
        let path = std::env::temp_dir().join("canboot-core-no-such-image.bin");
        assert!(matches!(FirmwareImage::load(&path), Err(ImageError::Io(_))));
    }

    #[test]
    fn test_load_from_disk() {
        let path = std::env::temp_dir().join(format!("canboot-core-image-{}.bin", std::process::id()));
        std::fs::write(&path, [0xDE, 0xAD, 0xBE, 0xEF, 0x01]).unwrap();
        let image = FirmwareImage::load(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(image.len(), 5);
    }
}
