use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use barge_protocol::FileChunkRequest;

use crate::{FrameCollector, TransferError};

/// Outcome of feeding one frame into the [`Reassembler`].
#[derive(Debug)]
pub enum IngestOutcome {
    /// More frames are still outstanding; no response is due yet.
    Pending { received: u32, total: u32 },
    /// The final frame arrived and the payload reassembled cleanly.
    Complete(ReassembledUpload),
    /// The transaction already finished; this frame is a late redelivery
    /// and was dropped.
    Discarded,
}

/// A fully reassembled upload, ready for the storage backend.
#[derive(Debug, Clone, PartialEq)]
pub struct ReassembledUpload {
    pub transaction_id: String,
    pub storage_id: Option<String>,
    pub filename: String,
    pub total_size: u64,
    pub bytes: Vec<u8>,
}

struct Pending {
    collector: FrameCollector,
    storage_id: Option<String>,
    filename: String,
    total_size: u64,
    last_touch: Instant,
}

#[derive(Default)]
struct Inner {
    pending: HashMap<String, Pending>,
    /// Transactions that completed, errored, or were swept, with the time
    /// they finished. Frames for these ids are discarded until the sweep
    /// horizon forgets them; without this, a redelivered terminal frame
    /// would open a fresh doomed entry.
    finished: HashMap<String, Instant>,
}

/// Shared map of in-flight chunked uploads, keyed by transaction id.
///
/// The first frame of a transaction allocates the entry and pins its
/// metadata; every later frame must agree on `total_chunks`. Completion and
/// every error path release the entry and record the id as finished, so a
/// transaction emits at most one [`IngestOutcome::Complete`] and frames
/// arriving afterwards are discarded.
#[derive(Default)]
pub struct Reassembler {
    inner: Mutex<Inner>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one frame. Frame content must already be decoded from base64
    /// (the JSON layer does this).
    ///
    /// The entry is taken out of the map for the duration of the call and
    /// only put back on the pending path, so every error path and the
    /// completion path release it without extra bookkeeping.
    pub fn ingest(&self, frame: FileChunkRequest) -> Result<IngestOutcome, TransferError> {
        let mut inner = self.inner.lock().unwrap();

        if inner.finished.contains_key(&frame.transaction_id) {
            return Ok(IngestOutcome::Discarded);
        }

        let mut pending = inner
            .pending
            .remove(&frame.transaction_id)
            .unwrap_or_else(|| Pending {
                collector: FrameCollector::new(frame.total_chunks, frame.total_size),
                storage_id: frame.storage_id.clone(),
                filename: frame.filename.clone(),
                total_size: frame.total_size,
                last_touch: Instant::now(),
            });

        if pending.collector.total_chunks() != frame.total_chunks {
            inner
                .finished
                .insert(frame.transaction_id.clone(), Instant::now());
            return Err(TransferError::TotalChunksMismatch {
                expected: pending.collector.total_chunks(),
                got: frame.total_chunks,
            });
        }

        pending.last_touch = Instant::now();
        if let Err(e) = pending.collector.insert(frame.chunk_index, frame.content) {
            inner
                .finished
                .insert(frame.transaction_id.clone(), Instant::now());
            return Err(e);
        }

        if !pending.collector.is_complete() {
            let received = pending.collector.received();
            let total = pending.collector.total_chunks();
            inner.pending.insert(frame.transaction_id, pending);
            return Ok(IngestOutcome::Pending { received, total });
        }

        inner
            .finished
            .insert(frame.transaction_id.clone(), Instant::now());
        drop(inner);

        let bytes = pending.collector.into_bytes()?;
        Ok(IngestOutcome::Complete(ReassembledUpload {
            transaction_id: frame.transaction_id,
            storage_id: pending.storage_id,
            filename: pending.filename,
            total_size: pending.total_size,
            bytes,
        }))
    }

    /// Evicts pending entries idle for longer than `max_idle` and forgets
    /// finished ids older than the same horizon. Evicted entries count as
    /// finished so straggler frames are discarded rather than resurrecting
    /// the transaction. Returns the evicted transaction ids.
    pub fn sweep(&self, max_idle: Duration) -> Vec<String> {
        let mut inner = self.inner.lock().unwrap();
        inner.finished.retain(|_, at| at.elapsed() <= max_idle);

        let stale: Vec<String> = inner
            .pending
            .iter()
            .filter(|(_, p)| p.last_touch.elapsed() > max_idle)
            .map(|(tx, _)| tx.clone())
            .collect();
        for tx in &stale {
            inner.pending.remove(tx);
            inner.finished.insert(tx.clone(), Instant::now());
        }
        stale
    }

    /// Number of transactions currently mid-reassembly.
    pub fn pending_count(&self) -> usize {
        self.inner.lock().unwrap().pending.len()
    }
}
