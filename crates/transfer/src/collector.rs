use std::collections::HashMap;

use crate::TransferError;

/// Accumulates the frames of one transaction, in any order.
///
/// Inserts are idempotent per index: the broker's at-least-once redelivery
/// may hand the same frame over twice, and the second copy is ignored so
/// the reassembled output never duplicates content.
pub struct FrameCollector {
    total_chunks: u32,
    total_size: u64,
    chunks: HashMap<u32, Vec<u8>>,
}

impl FrameCollector {
    pub fn new(total_chunks: u32, total_size: u64) -> Self {
        Self {
            total_chunks,
            total_size,
            chunks: HashMap::new(),
        }
    }

    /// Records a frame. Returns `true` if the index was new.
    pub fn insert(&mut self, index: u32, payload: Vec<u8>) -> Result<bool, TransferError> {
        if index >= self.total_chunks {
            return Err(TransferError::IndexOutOfRange {
                index,
                total: self.total_chunks,
            });
        }
        if self.chunks.contains_key(&index) {
            return Ok(false);
        }
        self.chunks.insert(index, payload);
        Ok(true)
    }

    /// Number of distinct frames recorded so far.
    pub fn received(&self) -> u32 {
        self.chunks.len() as u32
    }

    pub fn total_chunks(&self) -> u32 {
        self.total_chunks
    }

    pub fn is_complete(&self) -> bool {
        self.received() == self.total_chunks
    }

    /// Concatenates the payload in index order.
    ///
    /// Fails with `ChunkMissing` on the first absent index and with
    /// `SizeMismatch` when the assembled length differs from the declared
    /// total.
    pub fn into_bytes(mut self) -> Result<Vec<u8>, TransferError> {
        let mut out = Vec::with_capacity(self.total_size as usize);
        for i in 0..self.total_chunks {
            let chunk = self
                .chunks
                .remove(&i)
                .ok_or(TransferError::ChunkMissing(i))?;
            out.extend_from_slice(&chunk);
        }
        if out.len() as u64 != self.total_size {
            return Err(TransferError::SizeMismatch {
                expected: self.total_size,
                got: out.len() as u64,
            });
        }
        Ok(out)
    }
}
