//! Frame slicing and reassembly for broker-routed file transfer.
//!
//! A file crossing the broker is decomposed into frames of at most
//! [`barge_protocol::FRAME_LIMIT`] raw bytes. The sending side drives a
//! [`FrameSlicer`]; the receiving side accumulates frames in a
//! [`FrameCollector`] (one transaction) or a [`Reassembler`] (a shared map
//! of concurrent transactions with idle eviction).

mod collector;
mod reassembler;
mod slicer;
mod validation;

pub use collector::FrameCollector;
pub use reassembler::{IngestOutcome, ReassembledUpload, Reassembler};
pub use slicer::{Frame, FrameSlicer};
pub use validation::validate_filename;

/// Errors produced while slicing or reassembling frames.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("missing chunk {0}")]
    ChunkMissing(u32),

    #[error("chunk index {index} out of range (total {total})")]
    IndexOutOfRange { index: u32, total: u32 },

    #[error("chunk count mismatch: transaction declared {expected} chunks, frame says {got}")]
    TotalChunksMismatch { expected: u32, got: u32 },

    #[error("size mismatch: expected {expected} bytes, got {got}")]
    SizeMismatch { expected: u64, got: u64 },

    #[error("invalid filename: {0}")]
    InvalidFilename(String),
}

/// Number of frames a payload of `total_size` bytes occupies at `limit`
/// bytes per frame. Zero-byte payloads still occupy one frame.
pub fn frame_count(total_size: u64, limit: usize) -> u32 {
    if total_size == 0 {
        return 1;
    }
    total_size.div_ceil(limit as u64) as u32
}
