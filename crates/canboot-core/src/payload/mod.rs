//! Payload handling module.
//!
//! Provides image loading and word chunking for firmware uploads.

pub mod image;
pub mod job;

pub use image::{FirmwareImage, ImageError};
pub use job::{Chunk, TransferJob, chunk_count};
