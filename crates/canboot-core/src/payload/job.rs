//! Transfer job: walks a source buffer in 4-byte words.
//!
//! The node programs flash one word at a time, so every write-data command
//! carries exactly four bytes. A trailing partial word is filled with `0xFF`,
//! the erased-flash value the node expects.

use crate::checksum::crc32;
use crate::protocol::constants::{FILL_BYTE, WORD_SIZE};

/// One word ready to send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    /// Byte offset of this word in the source.
    pub offset: usize,
    /// Word contents, padded if the source ran out.
    pub word: [u8; WORD_SIZE],
    /// Number of source bytes in `word`; the rest is fill.
    pub len: usize,
}

impl Chunk {
    pub fn is_padded(&self) -> bool {
        self.len < WORD_SIZE
    }
}

/// Number of words needed for `len` bytes.
pub fn chunk_count(len: usize) -> usize {
    len.div_ceil(WORD_SIZE)
}

/// Cursor over a source buffer for the duration of one upload.
#[derive(Debug)]
pub struct TransferJob<'a> {
    source: &'a [u8],
    cursor: usize,
    local_crc: u32,
}

impl<'a> TransferJob<'a> {
    pub fn new(source: &'a [u8]) -> Self {
        Self {
            source,
            cursor: 0,
            local_crc: crc32(source),
        }
    }

    /// Next word, advancing the cursor.
    pub fn next_chunk(&mut self) -> Option<Chunk> {
        if self.cursor >= self.source.len() {
            return None;
        }

        let offset = self.cursor;
        let len = (self.source.len() - offset).min(WORD_SIZE);
        let mut word = [FILL_BYTE; WORD_SIZE];
        word[..len].copy_from_slice(&self.source[offset..offset + len]);
        self.cursor += len;

        Some(Chunk { offset, word, len })
    }

    pub fn total_len(&self) -> usize {
        self.source.len()
    }

    /// Source bytes consumed so far.
    pub fn bytes_sent(&self) -> usize {
        self.cursor
    }

    pub fn total_chunks(&self) -> usize {
        chunk_count(self.source.len())
    }

    /// CRC32 over the unpadded source.
    pub fn local_crc(&self) -> u32 {
        self.local_crc
    }

    /// Fill bytes appended to the last word.
    pub fn pad_len(&self) -> usize {
        self.total_chunks() * WORD_SIZE - self.source.len()
    }

    pub fn is_done(&self) -> bool {
        self.cursor >= self.source.len()
    }
}

impl Iterator for TransferJob<'_> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        self.next_chunk()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ten_byte_source() {
        let data: Vec<u8> = (1..=10).collect();
        let chunks: Vec<_> = TransferJob::new(&data).collect();

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].word, [1, 2, 3, 4]);
        assert_eq!(chunks[1].word, [5, 6, 7, 8]);
        assert_eq!(chunks[2].word, [9, 10, 0xFF, 0xFF]);
        assert_eq!(chunks[2].offset, 8);
        assert_eq!(chunks[2].len, 2);
        assert!(chunks[2].is_padded());
        assert!(!chunks[1].is_padded());
    }

    #[test]
    fn test_chunk_count_and_reassembly() {
        for len in 0..=33usize {
            let data: Vec<u8> = (0..len).map(|i| (i * 7 + 3) as u8).collect();
            let chunks: Vec<_> = TransferJob::new(&data).collect();
            assert_eq!(chunks.len(), len.div_ceil(4), "len {}", len);
            assert_eq!(chunks.len(), chunk_count(len));

            let joined: Vec<u8> = chunks.iter().flat_map(|c| c.word).collect();
            assert_eq!(&joined[..len], &data[..], "len {}", len);
            assert!(joined[len..].iter().all(|&b| b == 0xFF), "len {}", len);

            for (i, chunk) in chunks.iter().enumerate() {
                assert_eq!(chunk.offset, i * 4);
            }
        }
    }

    #[test]
    fn test_job_state() {
        let data = [0xAAu8; 9];
        let mut job = TransferJob::new(&data);

        assert_eq!(job.total_len(), 9);
        assert_eq!(job.total_chunks(), 3);
        assert_eq!(job.pad_len(), 3);
        assert_eq!(job.local_crc(), crc32(&data));
        assert!(!job.is_done());
        assert_eq!(job.bytes_sent(), 0);

        job.next_chunk().unwrap();
        assert_eq!(job.bytes_sent(), 4);
        job.next_chunk().unwrap();
        job.next_chunk().unwrap();
        assert_eq!(job.bytes_sent(), 9);
        assert!(job.is_done());
        assert!(job.next_chunk().is_none());
    }

    #[test]
    fn test_aligned_source_has_no_padding() {
        let data = [0x11u8; 8];
        let job = TransferJob::new(&data);
        assert_eq!(job.pad_len(), 0);
        assert!(job.into_iter().all(|c| !c.is_padded()));
    }
}
