use crate::{TransferError, frame_count};

/// Push-based frame splitter.
///
/// The caller feeds bytes in whatever increments its source produces
/// (multipart body reads, file reads) and receives completed frames back.
/// At most one frame worth of raw bytes is buffered at any point, so the
/// source is never held in memory as a whole.
///
/// The declared total size is load-bearing: `total_chunks` is derived from
/// it up front and stamped on every frame, and [`finish`](Self::finish)
/// fails if the fed byte count disagrees.
pub struct FrameSlicer {
    limit: usize,
    total_size: u64,
    total_chunks: u32,
    buf: Vec<u8>,
    next_index: u32,
    fed: u64,
}

/// A completed frame: its index and raw payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub index: u32,
    pub payload: Vec<u8>,
}

impl FrameSlicer {
    /// Creates a slicer for a payload of `total_size` bytes at `limit`
    /// bytes per frame.
    pub fn new(total_size: u64, limit: usize) -> Self {
        Self {
            limit,
            total_size,
            total_chunks: frame_count(total_size, limit),
            buf: Vec::with_capacity(limit.min(total_size as usize + 1)),
            next_index: 0,
            fed: 0,
        }
    }

    /// Total number of frames this payload occupies.
    pub fn total_chunks(&self) -> u32 {
        self.total_chunks
    }

    /// Feeds bytes in, returns zero or more completed frames.
    pub fn push(&mut self, mut data: &[u8]) -> Vec<Frame> {
        self.fed += data.len() as u64;
        let mut out = Vec::new();
        while !data.is_empty() {
            let want = self.limit - self.buf.len();
            let take = want.min(data.len());
            self.buf.extend_from_slice(&data[..take]);
            data = &data[take..];

            if self.buf.len() == self.limit {
                let payload = std::mem::replace(&mut self.buf, Vec::with_capacity(self.limit));
                out.push(Frame {
                    index: self.next_index,
                    payload,
                });
                self.next_index += 1;
            }
        }
        out
    }

    /// Flushes the final partial frame, if any.
    ///
    /// Fails with [`TransferError::SizeMismatch`] when the fed byte count
    /// differs from the declared total. A zero-byte payload yields one
    /// empty frame so the receiver still observes a terminal frame.
    pub fn finish(mut self) -> Result<Option<Frame>, TransferError> {
        if self.fed != self.total_size {
            return Err(TransferError::SizeMismatch {
                expected: self.total_size,
                got: self.fed,
            });
        }
        if self.buf.is_empty() && self.next_index > 0 {
            return Ok(None);
        }
        let payload = std::mem::take(&mut self.buf);
        Ok(Some(Frame {
            index: self.next_index,
            payload,
        }))
    }
}
