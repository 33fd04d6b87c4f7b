//! Broker-side file operations, one transaction per call.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use barge_broker::{Broker, BrokerError, ConsumeOptions, QueueSpec};
use barge_protocol::{
    DIAGNOSE_EXCHANGE, FILEMANAGER_EXCHANGE, FRAME_LIMIT, DiagnoseMessage, DiagnoseResponse,
    FileChunkRequest, FileManagerRequest, FileManagerResponse, FileUploadRequest, Operation,
};
use barge_transfer::{FrameSlicer, TransferError};

use crate::registry::{TransactionRegistry, WaitError};
use crate::timeouts::{DOWNLOAD_TIMEOUT, METADATA_TIMEOUT, upload_timeout};

/// Pause between published frames; softens broker backpressure on long
/// uploads without affecting correctness.
const INTER_FRAME_PAUSE: Duration = Duration::from_millis(10);

/// Errors surfaced to the HTTP layer.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Wait(#[from] WaitError),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error("failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Publishes file operations and awaits their correlated responses.
pub struct FileClient<B> {
    broker: Arc<B>,
    registry: TransactionRegistry<B>,
}

impl<B: Broker> FileClient<B> {
    pub fn new(broker: Arc<B>) -> Self {
        let registry = TransactionRegistry::new(Arc::clone(&broker));
        Self { broker, registry }
    }

    /// Declares the exchanges this client publishes to. Idempotent; called
    /// once at startup.
    pub async fn setup(&self) -> Result<(), BrokerError> {
        self.broker.declare_exchange(FILEMANAGER_EXCHANGE).await?;
        self.broker.declare_exchange(DIAGNOSE_EXCHANGE).await?;
        Ok(())
    }

    /// Uploads one file and waits for the outcome envelope.
    ///
    /// Files within the frame limit go out as a single message; larger
    /// ones stream as chunk frames. Either way the response arrives on the
    /// `post.file` response key, so one binding covers both paths.
    pub async fn upload(
        &self,
        filename: &str,
        bytes: &[u8],
        storage_id: Option<String>,
    ) -> Result<FileManagerResponse, ClientError> {
        let timeout = upload_timeout(bytes.len() as u64);
        let mut transaction = self.registry.begin(Operation::PostFile, false).await?;

        if bytes.len() <= FRAME_LIMIT {
            let request = FileUploadRequest {
                transaction_id: transaction.id.clone(),
                storage_id,
                filename: filename.to_string(),
                content: bytes.to_vec(),
                size: bytes.len() as u64,
                is_chunked: false,
                chunk_index: None,
                total_chunks: None,
            };
            self.publish(&Operation::PostFile.request_key(), &serde_json::to_vec(&request)?)
                .await?;
        } else {
            self.publish_chunked(&transaction.id, filename, bytes, storage_id)
                .await?;
        }

        debug!(
            transaction = %transaction.id,
            filename,
            size = bytes.len(),
            timeout_secs = timeout.as_secs(),
            "upload published, awaiting response"
        );
        Ok(transaction.await_envelope(timeout).await?)
    }

    async fn publish_chunked(
        &self,
        transaction_id: &str,
        filename: &str,
        bytes: &[u8],
        storage_id: Option<String>,
    ) -> Result<(), ClientError> {
        let mut slicer = FrameSlicer::new(bytes.len() as u64, FRAME_LIMIT);
        let total_chunks = slicer.total_chunks();
        let total_size = bytes.len() as u64;

        let mut frames = Vec::new();
        for piece in bytes.chunks(FRAME_LIMIT) {
            frames.extend(slicer.push(piece));
        }
        if let Some(last) = slicer.finish()? {
            frames.push(last);
        }

        info!(
            transaction = %transaction_id,
            filename,
            total_chunks,
            "streaming chunked upload"
        );
        let key = Operation::PostFileChunk.request_key();
        for frame in frames {
            let request = FileChunkRequest {
                transaction_id: transaction_id.to_string(),
                storage_id: storage_id.clone(),
                filename: filename.to_string(),
                chunk_index: frame.index,
                total_chunks,
                chunk_size: frame.payload.len() as u64,
                total_size,
                content: frame.payload,
            };
            self.publish(&key, &serde_json::to_vec(&request)?).await?;
            tokio::time::sleep(INTER_FRAME_PAUSE).await;
        }
        Ok(())
    }

    /// Lists a bucket's contents.
    pub async fn list(&self, storage_id: &str) -> Result<FileManagerResponse, ClientError> {
        self.envelope_op(Operation::GetFiles, storage_id, None).await
    }

    /// Downloads one file as reassembled bytes.
    pub async fn download(
        &self,
        storage_id: &str,
        filename: &str,
    ) -> Result<Vec<u8>, ClientError> {
        let mut transaction = self.registry.begin(Operation::GetFile, true).await?;
        let request = FileManagerRequest {
            transaction_id: transaction.id.clone(),
            storage_id: Some(storage_id.to_string()),
            filename: Some(filename.to_string()),
        };
        self.publish(&Operation::GetFile.request_key(), &serde_json::to_vec(&request)?)
            .await?;
        Ok(transaction.await_download(DOWNLOAD_TIMEOUT).await?)
    }

    /// Removes one file.
    pub async fn delete_file(
        &self,
        storage_id: &str,
        filename: &str,
    ) -> Result<FileManagerResponse, ClientError> {
        self.envelope_op(Operation::DeleteFile, storage_id, Some(filename))
            .await
    }

    /// Removes a whole bucket.
    pub async fn delete_folder(&self, storage_id: &str) -> Result<FileManagerResponse, ClientError> {
        self.envelope_op(Operation::DeleteFolder, storage_id, None)
            .await
    }

    async fn envelope_op(
        &self,
        op: Operation,
        storage_id: &str,
        filename: Option<&str>,
    ) -> Result<FileManagerResponse, ClientError> {
        let mut transaction = self.registry.begin(op, false).await?;
        let request = FileManagerRequest {
            transaction_id: transaction.id.clone(),
            storage_id: Some(storage_id.to_string()),
            filename: filename.map(str::to_string),
        };
        self.publish(&op.request_key(), &serde_json::to_vec(&request)?)
            .await?;
        Ok(transaction.await_envelope(METADATA_TIMEOUT).await?)
    }

    /// Fans a health check out to every service and collects whatever
    /// answers within `window`.
    pub async fn diagnose(&self, window: Duration) -> Result<Vec<DiagnoseResponse>, ClientError> {
        let queue = self.broker.declare_queue(QueueSpec::reply()).await?;
        self.broker
            .bind(&queue, "diagnose.services.response.*", DIAGNOSE_EXCHANGE)
            .await?;
        let mut sub = self.broker.consume(&queue, ConsumeOptions::default()).await?;

        let message = DiagnoseMessage {
            transaction_id: uuid::Uuid::new_v4().to_string(),
            operation: "all".to_string(),
            message: Some("health check".to_string()),
        };
        self.broker
            .publish(
                DIAGNOSE_EXCHANGE,
                "diagnose.services.all",
                "application/json",
                serde_json::to_vec(&message)?,
            )
            .await?;

        let mut responses = Vec::new();
        let deadline = tokio::time::Instant::now() + window;
        while let Some(remaining) = deadline.checked_duration_since(tokio::time::Instant::now()) {
            let Ok(next) = tokio::time::timeout(remaining, sub.next()).await else {
                break;
            };
            let Some(delivery) = next else { break };
            let _ = delivery.acker.ack().await;
            if let Ok(response) = serde_json::from_slice::<DiagnoseResponse>(&delivery.body) {
                responses.push(response);
            }
        }
        Ok(responses)
    }

    async fn publish(&self, routing_key: &str, body: &[u8]) -> Result<(), ClientError> {
        self.broker
            .publish(
                FILEMANAGER_EXCHANGE,
                routing_key,
                "application/json",
                body.to_vec(),
            )
            .await?;
        Ok(())
    }
}
