use sha2::{Digest, Sha256};

use crate::DEFAULT_CHUNK_SIZE;

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Splits a fully buffered payload into fixed-size chunks.
///
/// The whole payload stays in memory for the lifetime of the transfer.
pub struct ChunkSource {
    payload: Vec<u8>,
    chunk_size: usize,
    offset: usize,
}

impl ChunkSource {
    /// Wraps `payload` for chunked reading.
    ///
    /// If `chunk_size` is 0, [`DEFAULT_CHUNK_SIZE`] (1 MiB) is used.
    pub fn new(payload: Vec<u8>, chunk_size: usize) -> Self {
        let chunk_size = if chunk_size == 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            chunk_size
        };
        Self {
            payload,
            chunk_size,
            offset: 0,
        }
    }

    /// Returns the next chunk, shorter at the end. `None` once exhausted.
    pub fn next_chunk(&mut self) -> Option<&[u8]> {
        if self.offset >= self.payload.len() {
            return None;
        }
        let end = (self.offset + self.chunk_size).min(self.payload.len());
        let chunk = &self.payload[self.offset..end];
        self.offset = end;
        Some(chunk)
    }

    /// Current byte offset.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Total payload size in bytes.
    pub fn total(&self) -> usize {
        self.payload.len()
    }

    /// Bytes remaining to read.
    pub fn remaining(&self) -> usize {
        self.payload.len() - self.offset
    }
}
