//! Transaction correlation: synchronous waits on asynchronous broker RPC.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};
use uuid::Uuid;

use barge_broker::{Broker, BrokerError, ConsumeOptions, QueueSpec, Subscription};
use barge_protocol::{
    FILEMANAGER_EXCHANGE, FileChunkResponse, FileManagerResponse, Operation, download_chunk_key,
};
use barge_transfer::{FrameCollector, TransferError};

use crate::timeouts::download_chunk_timeout;

/// Errors while waiting on a transaction.
#[derive(Debug, thiserror::Error)]
pub enum WaitError {
    #[error("timeout waiting for response")]
    Timeout,

    #[error("reply queue closed")]
    Closed,

    #[error("{0}")]
    Rejected(String),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Transfer(#[from] TransferError),
}

/// Mints transactions: a fresh id, an exclusive auto-delete reply queue
/// bound to the transaction's response key(s), and a consumer started
/// before the caller publishes anything.
///
/// The consume-before-publish ordering is load-bearing: the filemanager
/// may answer within microseconds, and a response published before the
/// reply queue exists is dropped by the broker.
pub struct TransactionRegistry<B> {
    broker: Arc<B>,
}

impl<B: Broker> TransactionRegistry<B> {
    pub fn new(broker: Arc<B>) -> Self {
        Self { broker }
    }

    /// Opens a transaction for `op`. With `download`, the chunk-stream key
    /// is bound alongside the envelope key.
    pub async fn begin(
        &self,
        op: Operation,
        download: bool,
    ) -> Result<PendingTransaction, BrokerError> {
        let id = Uuid::new_v4().to_string();

        let queue = self.broker.declare_queue(QueueSpec::reply()).await?;
        self.broker
            .bind(&queue, &op.response_key(&id), FILEMANAGER_EXCHANGE)
            .await?;
        if download {
            self.broker
                .bind(&queue, &download_chunk_key(&id), FILEMANAGER_EXCHANGE)
                .await?;
        }

        let sub = self
            .broker
            .consume(&queue, ConsumeOptions::default())
            .await?;
        debug!(transaction = %id, queue = %queue, "transaction opened");

        Ok(PendingTransaction { id, queue, sub })
    }
}

/// One in-flight transaction. Dropping it cancels the consumer; the broker
/// reclaims the exclusive queue and discards late responses.
pub struct PendingTransaction {
    pub id: String,
    queue: String,
    sub: Subscription,
}

impl PendingTransaction {
    /// Name of the broker-minted reply queue.
    pub fn queue_name(&self) -> &str {
        &self.queue
    }

    /// Waits for the single response envelope.
    pub async fn await_envelope(
        &mut self,
        timeout: Duration,
    ) -> Result<FileManagerResponse, WaitError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline
                .checked_duration_since(tokio::time::Instant::now())
                .ok_or(WaitError::Timeout)?;
            let delivery = tokio::time::timeout(remaining, self.sub.next())
                .await
                .map_err(|_| WaitError::Timeout)?
                .ok_or(WaitError::Closed)?;
            let _ = delivery.acker.ack().await;

            match serde_json::from_slice::<FileManagerResponse>(&delivery.body) {
                Ok(envelope) => return Ok(envelope),
                Err(e) => {
                    // Not fatal: a stray frame on a shared reply queue.
                    warn!(transaction = %self.id, error = %e, "skipping undecodable reply");
                }
            }
        }
    }

    /// Collects a download: the metadata envelope plus its chunk stream,
    /// tolerating out-of-order and duplicated frames.
    ///
    /// Every chunk frame carries `total_chunks`, so collection can start
    /// from whichever message arrives first; the envelope's only unique
    /// duty is early failure reporting.
    pub async fn await_download(&mut self, overall: Duration) -> Result<Vec<u8>, WaitError> {
        let deadline = tokio::time::Instant::now() + overall;
        let mut collector: Option<FrameCollector> = None;
        let mut expected_chunks: Option<u32> = None;

        loop {
            let remaining = deadline
                .checked_duration_since(tokio::time::Instant::now())
                .ok_or(WaitError::Timeout)?;
            let per_chunk = expected_chunks
                .map(|n| download_chunk_timeout(overall, n))
                .unwrap_or(overall);
            let wait = per_chunk.min(remaining);

            let delivery = tokio::time::timeout(wait, self.sub.next())
                .await
                .map_err(|_| WaitError::Timeout)?
                .ok_or(WaitError::Closed)?;
            let _ = delivery.acker.ack().await;

            // Chunk frames carry index fields an envelope lacks, so try
            // the narrower shape first.
            if let Ok(frame) = serde_json::from_slice::<FileChunkResponse>(&delivery.body) {
                expected_chunks = Some(frame.total_chunks);
                let complete = {
                    let c = collector.get_or_insert_with(|| {
                        FrameCollector::new(frame.total_chunks, frame.total_size)
                    });
                    c.insert(frame.chunk_index, frame.content)?;
                    c.is_complete()
                };
                if complete {
                    if let Some(done) = collector.take() {
                        return Ok(done.into_bytes()?);
                    }
                }
                continue;
            }

            match serde_json::from_slice::<FileManagerResponse>(&delivery.body) {
                Ok(envelope) if !envelope.success => {
                    return Err(WaitError::Rejected(
                        envelope.error.unwrap_or_else(|| "download failed".into()),
                    ));
                }
                Ok(envelope) => {
                    if let Some(chunks) = envelope
                        .data
                        .as_ref()
                        .and_then(|d| d.get("total_chunks"))
                        .and_then(|v| v.as_u64())
                    {
                        expected_chunks = Some(chunks as u32);
                    }
                }
                Err(e) => {
                    warn!(transaction = %self.id, error = %e, "skipping undecodable reply");
                }
            }
        }
    }
}
