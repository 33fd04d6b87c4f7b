use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;
use tracing::{debug, error, info, warn};

use barge_broker::{Broker, BrokerError, Delivery};
use barge_protocol::{
    FILEMANAGER_EXCHANGE, FRAME_LIMIT, FileChunkRequest, FileChunkResponse, FileManagerRequest,
    FileManagerResponse, FileUploadRequest, FilesUploadRequest, FileInfo, Operation,
    download_chunk_key,
};
use barge_storage::Storage;
use barge_transfer::{IngestOutcome, Reassembler, frame_count};

use crate::ops::{FileOps, UploadOutcome};

/// Routes deliveries from the operation queues to storage.
///
/// Acknowledgement discipline, per queue message:
/// - JSON decode failure: nack without requeue (poisoned), no response.
/// - Handler errors: converted to a failure envelope, then acked.
/// - Response publish failure: nack with requeue (transient).
/// - Chunk frames: acked immediately after reassembler ingest, so broker
///   redelivery stays bounded while a long upload is in flight.
pub struct FileManager<B, S> {
    broker: Arc<B>,
    ops: FileOps<S>,
    reassembler: Reassembler,
}

impl<B: Broker, S: Storage> FileManager<B, S> {
    pub fn new(broker: Arc<B>, storage: Arc<S>) -> Self {
        Self {
            broker,
            ops: FileOps::new(storage),
            reassembler: Reassembler::new(),
        }
    }

    pub fn reassembler(&self) -> &Reassembler {
        &self.reassembler
    }

    /// Entry point for one delivery from an operation queue.
    pub async fn handle_delivery(&self, op: Operation, delivery: Delivery) {
        match op {
            Operation::PostFileChunk => self.handle_chunk(delivery).await,
            Operation::GetFile => self.handle_get_file(delivery).await,
            _ => self.handle_envelope_op(op, delivery).await,
        }
    }

    /// Operations with a plain request-in, envelope-out shape.
    async fn handle_envelope_op(&self, op: Operation, delivery: Delivery) {
        let response = match op {
            Operation::PostFile => match serde_json::from_slice::<FileUploadRequest>(&delivery.body)
            {
                Ok(req) => self.post_file(req).await,
                Err(_) => {
                    // A bare FileManagerRequest on this queue is well-formed
                    // but incomplete; anything else is poison.
                    match serde_json::from_slice::<FileManagerRequest>(&delivery.body) {
                        Ok(req) => FileManagerResponse::failure(
                            req.transaction_id,
                            "file content is required for post.file",
                        ),
                        Err(e) => return self.poison(delivery, e).await,
                    }
                }
            },
            Operation::PostFiles => {
                match serde_json::from_slice::<FilesUploadRequest>(&delivery.body) {
                    Ok(req) => self.post_files(req).await,
                    Err(e) => return self.poison(delivery, e).await,
                }
            }
            Operation::GetFiles | Operation::DeleteFile | Operation::DeleteFolder => {
                match serde_json::from_slice::<FileManagerRequest>(&delivery.body) {
                    Ok(req) => match op {
                        Operation::GetFiles => self.get_files(req).await,
                        Operation::DeleteFile => self.delete_file(req).await,
                        _ => self.delete_folder(req).await,
                    },
                    Err(e) => return self.poison(delivery, e).await,
                }
            }
            // Routed to dedicated handlers in handle_delivery.
            Operation::PostFileChunk | Operation::GetFile => return,
        };

        self.respond_and_ack(op, response, delivery).await;
    }

    async fn post_file(&self, req: FileUploadRequest) -> FileManagerResponse {
        if req.content.len() as u64 != req.size {
            return FileManagerResponse::failure(
                req.transaction_id,
                format!(
                    "size mismatch: declared {} bytes, received {}",
                    req.size,
                    req.content.len()
                ),
            );
        }
        match self
            .ops
            .save_file(req.storage_id.as_deref(), &req.filename, &req.content)
            .await
        {
            Ok(outcome) => upload_response(req.transaction_id, outcome),
            Err(e) => FileManagerResponse::failure(req.transaction_id, e.to_string()),
        }
    }

    async fn post_files(&self, req: FilesUploadRequest) -> FileManagerResponse {
        if req.files.is_empty() {
            return FileManagerResponse::failure(req.transaction_id, "no files provided");
        }
        let files: Vec<(String, Vec<u8>)> = req
            .files
            .into_iter()
            .map(|f| (f.filename, f.content))
            .collect();
        match self.ops.save_files(req.storage_id.as_deref(), &files).await {
            Ok(outcome) => upload_response(req.transaction_id, outcome),
            Err(e) => FileManagerResponse::failure(req.transaction_id, e.to_string()),
        }
    }

    async fn get_files(&self, req: FileManagerRequest) -> FileManagerResponse {
        let Some(storage_id) = req.storage_id.filter(|s| !s.is_empty()) else {
            return FileManagerResponse::failure(req.transaction_id, "storage_id is required");
        };
        match self.ops.list(&storage_id).await {
            Ok((files, total_size)) => FileManagerResponse {
                transaction_id: req.transaction_id,
                success: true,
                storage_id: Some(storage_id),
                files: Some(
                    files
                        .into_iter()
                        .map(|f| FileInfo {
                            filename: f.filename,
                            size: f.size,
                        })
                        .collect(),
                ),
                total_size: Some(total_size),
                ..Default::default()
            },
            Err(e) => FileManagerResponse::failure(req.transaction_id, e.to_string()),
        }
    }

    async fn delete_file(&self, req: FileManagerRequest) -> FileManagerResponse {
        let (Some(storage_id), Some(filename)) = (
            req.storage_id.filter(|s| !s.is_empty()),
            req.filename.filter(|f| !f.is_empty()),
        ) else {
            return FileManagerResponse::failure(
                req.transaction_id,
                "storage_id and filename are required",
            );
        };
        match self.ops.delete_file(&storage_id, &filename).await {
            Ok(()) => FileManagerResponse {
                transaction_id: req.transaction_id,
                success: true,
                storage_id: Some(storage_id),
                ..Default::default()
            },
            Err(e) => FileManagerResponse::failure(req.transaction_id, e.to_string()),
        }
    }

    async fn delete_folder(&self, req: FileManagerRequest) -> FileManagerResponse {
        let Some(storage_id) = req.storage_id.filter(|s| !s.is_empty()) else {
            return FileManagerResponse::failure(req.transaction_id, "storage_id is required");
        };
        match self.ops.delete_bucket(&storage_id).await {
            Ok(()) => FileManagerResponse {
                transaction_id: req.transaction_id,
                success: true,
                storage_id: Some(storage_id),
                ..Default::default()
            },
            Err(e) => FileManagerResponse::failure(req.transaction_id, e.to_string()),
        }
    }

    /// Streaming-upload frames. Acked as soon as the reassembler records
    /// them; only the terminal frame produces a response, published on the
    /// `post.file` response key.
    async fn handle_chunk(&self, delivery: Delivery) {
        let frame: FileChunkRequest = match serde_json::from_slice(&delivery.body) {
            Ok(f) => f,
            Err(e) => return self.poison(delivery, e).await,
        };
        let transaction_id = frame.transaction_id.clone();

        let outcome = self.reassembler.ingest(frame);
        if let Err(e) = delivery.acker.ack().await {
            warn!(transaction = %transaction_id, error = %e, "failed to ack chunk");
        }

        let response = match outcome {
            Ok(IngestOutcome::Pending { received, total }) => {
                debug!(
                    transaction = %transaction_id,
                    received, total, "chunk recorded, waiting for more"
                );
                return;
            }
            Ok(IngestOutcome::Discarded) => {
                debug!(
                    transaction = %transaction_id,
                    "late chunk for finished transaction, dropped"
                );
                return;
            }
            Ok(IngestOutcome::Complete(upload)) => {
                info!(
                    transaction = %transaction_id,
                    filename = %upload.filename,
                    size = upload.total_size,
                    "all chunks received, storing file"
                );
                match self
                    .ops
                    .save_file(upload.storage_id.as_deref(), &upload.filename, &upload.bytes)
                    .await
                {
                    Ok(outcome) => upload_response(transaction_id.clone(), outcome),
                    Err(e) => FileManagerResponse::failure(transaction_id.clone(), e.to_string()),
                }
            }
            Err(e) => FileManagerResponse::failure(transaction_id.clone(), e.to_string()),
        };

        // The frame is already acked, so a failed publish can only be
        // logged; the gateway's deadline covers the loss.
        let key = Operation::PostFileChunk.response_key(&transaction_id);
        if let Err(e) = self.publish_response(&key, &response).await {
            error!(
                transaction = %transaction_id,
                error = %e,
                "failed to publish chunked-upload response"
            );
        }
    }

    /// Download: metadata envelope first, then the chunk stream.
    ///
    /// The envelope precedes the frames so the receiver learns the chunk
    /// count before counting; every frame repeats `total_chunks` anyway so
    /// out-of-order consumption still converges.
    async fn handle_get_file(&self, delivery: Delivery) {
        let req: FileManagerRequest = match serde_json::from_slice(&delivery.body) {
            Ok(r) => r,
            Err(e) => return self.poison(delivery, e).await,
        };
        let transaction_id = req.transaction_id.clone();

        let (Some(storage_id), Some(filename)) = (
            req.storage_id.filter(|s| !s.is_empty()),
            req.filename.filter(|f| !f.is_empty()),
        ) else {
            let response = FileManagerResponse::failure(
                transaction_id,
                "storage_id and filename are required",
            );
            return self.respond_and_ack(Operation::GetFile, response, delivery).await;
        };

        let size = match self.ops.file_size(&storage_id, &filename).await {
            Ok(size) => size,
            Err(e) => {
                let response = FileManagerResponse::failure(transaction_id, e.to_string());
                return self.respond_and_ack(Operation::GetFile, response, delivery).await;
            }
        };
        let total_chunks = frame_count(size, FRAME_LIMIT);

        let envelope = FileManagerResponse {
            transaction_id: transaction_id.clone(),
            success: true,
            storage_id: Some(storage_id.clone()),
            data: Some(HashMap::from([
                ("filename".to_string(), json!(filename)),
                ("total_size".to_string(), json!(size)),
                ("total_chunks".to_string(), json!(total_chunks)),
            ])),
            ..Default::default()
        };
        let envelope_key = Operation::GetFile.response_key(&transaction_id);
        if let Err(e) = self.publish_response(&envelope_key, &envelope).await {
            error!(transaction = %transaction_id, error = %e, "failed to publish download envelope");
            let _ = delivery.acker.nack(true).await;
            return;
        }

        let chunk_key = download_chunk_key(&transaction_id);
        for index in 0..total_chunks {
            let offset = index as u64 * FRAME_LIMIT as u64;
            let want = (size - offset.min(size)).min(FRAME_LIMIT as u64) as usize;
            let bytes = match self.ops.read_range(&storage_id, &filename, offset, want).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    error!(
                        transaction = %transaction_id,
                        chunk = index,
                        error = %e,
                        "failed to read file chunk"
                    );
                    let _ = delivery.acker.nack(true).await;
                    return;
                }
            };

            let frame = FileChunkResponse {
                transaction_id: transaction_id.clone(),
                storage_id: storage_id.clone(),
                filename: filename.clone(),
                chunk_index: index,
                total_chunks,
                chunk_size: bytes.len() as u64,
                total_size: size,
                content: bytes,
                is_last_chunk: index + 1 == total_chunks,
            };
            let body = match serde_json::to_vec(&frame) {
                Ok(body) => body,
                Err(e) => {
                    error!(transaction = %transaction_id, error = %e, "failed to encode chunk");
                    let _ = delivery.acker.nack(false).await;
                    return;
                }
            };
            if let Err(e) = self
                .broker
                .publish(FILEMANAGER_EXCHANGE, &chunk_key, "application/json", body)
                .await
            {
                error!(
                    transaction = %transaction_id,
                    chunk = index,
                    error = %e,
                    "failed to publish file chunk"
                );
                let _ = delivery.acker.nack(true).await;
                return;
            }
        }

        if let Err(e) = delivery.acker.ack().await {
            warn!(transaction = %transaction_id, error = %e, "failed to ack download request");
        }
    }

    async fn respond_and_ack(
        &self,
        op: Operation,
        response: FileManagerResponse,
        delivery: Delivery,
    ) {
        let key = op.response_key(&response.transaction_id);
        match self.publish_response(&key, &response).await {
            Ok(()) => {
                if let Err(e) = delivery.acker.ack().await {
                    warn!(key = %key, error = %e, "failed to ack request");
                }
            }
            Err(e) => {
                error!(key = %key, error = %e, "failed to publish response, requeueing request");
                let _ = delivery.acker.nack(true).await;
            }
        }
    }

    async fn publish_response(
        &self,
        routing_key: &str,
        response: &FileManagerResponse,
    ) -> Result<(), BrokerError> {
        let body =
            serde_json::to_vec(response).map_err(|e| BrokerError::Publish(e.to_string()))?;
        self.broker
            .publish(FILEMANAGER_EXCHANGE, routing_key, "application/json", body)
            .await
    }

    async fn poison(&self, delivery: Delivery, err: serde_json::Error) {
        warn!(
            routing_key = %delivery.routing_key,
            error = %err,
            "malformed message, dropping without requeue"
        );
        let _ = delivery.acker.nack(false).await;
    }
}

fn upload_response(transaction_id: String, outcome: UploadOutcome) -> FileManagerResponse {
    FileManagerResponse {
        transaction_id,
        success: true,
        storage_id: Some(outcome.storage_id.as_str().to_string()),
        files: Some(
            outcome
                .files
                .into_iter()
                .map(|f| FileInfo {
                    filename: f.filename,
                    size: f.size,
                })
                .collect(),
        ),
        total_size: Some(outcome.total_size),
        ..Default::default()
    }
}
