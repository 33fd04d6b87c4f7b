//! Contract tests for the filemanager service against the in-process broker.
//!
//! These drive the service exactly the way the gateway does: publish a
//! request on an operation routing key, await the correlated response on a
//! transaction-scoped reply queue.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use barge_broker::{Broker, ConsumeOptions, MemoryBroker, QueueSpec, Subscription};
use barge_protocol::{
    DIAGNOSE_EXCHANGE, FILEMANAGER_EXCHANGE, FRAME_LIMIT, DiagnoseMessage, DiagnoseResponse,
    FileChunkRequest, FileChunkResponse, FileManagerRequest, FileManagerResponse, FilePayload,
    FileUploadRequest, FilesUploadRequest, Operation, diagnose_response_key, download_chunk_key,
};
use barge_storage::LocalStorage;
use barge_transfer::FrameSlicer;

struct Harness {
    broker: MemoryBroker,
    _storage_dir: tempfile::TempDir,
    cancel: CancellationToken,
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn start() -> Harness {
    let broker = MemoryBroker::new();
    let storage_dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(LocalStorage::new(storage_dir.path()).await.unwrap());
    let cancel = CancellationToken::new();

    {
        let broker = Arc::new(broker.clone());
        let cancel = cancel.clone();
        tokio::spawn(async move {
            barge_filemanager::run(broker, storage, cancel).await.unwrap();
        });
    }

    // The diagnose queue is the last piece of topology `run` declares.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !broker.has_queue("filemanager.diagnose") {
        assert!(
            tokio::time::Instant::now() < deadline,
            "filemanager topology never came up"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    Harness {
        broker,
        _storage_dir: storage_dir,
        cancel,
    }
}

async fn reply_queue(broker: &MemoryBroker, exchange: &str, keys: &[String]) -> Subscription {
    let queue = broker.declare_queue(QueueSpec::reply()).await.unwrap();
    for key in keys {
        broker.bind(&queue, key, exchange).await.unwrap();
    }
    broker
        .consume(&queue, ConsumeOptions::default())
        .await
        .unwrap()
}

async fn publish(broker: &MemoryBroker, key: &str, body: &impl serde::Serialize) {
    broker
        .publish(
            FILEMANAGER_EXCHANGE,
            key,
            "application/json",
            serde_json::to_vec(body).unwrap(),
        )
        .await
        .unwrap();
}

async fn next_response(sub: &mut Subscription) -> FileManagerResponse {
    let delivery = tokio::time::timeout(Duration::from_secs(2), sub.next())
        .await
        .expect("timed out waiting for response")
        .expect("reply queue closed");
    delivery.acker.ack().await.unwrap();
    serde_json::from_slice(&delivery.body).unwrap()
}

fn tx() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[tokio::test]
async fn small_upload_roundtrip() {
    let h = start().await;
    let transaction = tx();
    let content = b"hello world, this is a test.\n\n\n".to_vec();

    let mut reply = reply_queue(
        &h.broker,
        FILEMANAGER_EXCHANGE,
        &[Operation::PostFile.response_key(&transaction)],
    )
    .await;

    publish(
        &h.broker,
        &Operation::PostFile.request_key(),
        &FileUploadRequest {
            transaction_id: transaction.clone(),
            storage_id: None,
            filename: "greeting.txt".into(),
            size: content.len() as u64,
            content: content.clone(),
            is_chunked: false,
            chunk_index: None,
            total_chunks: None,
        },
    )
    .await;

    let response = next_response(&mut reply).await;
    assert!(response.success, "upload failed: {:?}", response.error);
    assert_eq!(response.transaction_id, transaction);

    let storage_id = response.storage_id.unwrap();
    assert_eq!(storage_id.len(), 10);
    assert!(storage_id.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));

    let files = response.files.unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].filename, "greeting.txt");
    assert_eq!(files[0].size, 31);
    assert_eq!(response.total_size, Some(31));

    // Listing agrees.
    let list_tx = tx();
    let mut list_reply = reply_queue(
        &h.broker,
        FILEMANAGER_EXCHANGE,
        &[Operation::GetFiles.response_key(&list_tx)],
    )
    .await;
    publish(
        &h.broker,
        &Operation::GetFiles.request_key(),
        &FileManagerRequest {
            transaction_id: list_tx,
            storage_id: Some(storage_id.clone()),
            filename: None,
        },
    )
    .await;
    let listing = next_response(&mut list_reply).await;
    assert!(listing.success);
    assert_eq!(listing.total_size, Some(31));

    // Download returns the exact bytes.
    let dl_tx = tx();
    let mut dl_reply = reply_queue(
        &h.broker,
        FILEMANAGER_EXCHANGE,
        &[
            Operation::GetFile.response_key(&dl_tx),
            download_chunk_key(&dl_tx),
        ],
    )
    .await;
    publish(
        &h.broker,
        &Operation::GetFile.request_key(),
        &FileManagerRequest {
            transaction_id: dl_tx,
            storage_id: Some(storage_id),
            filename: Some("greeting.txt".into()),
        },
    )
    .await;

    // Envelope first, carrying the chunk count.
    let envelope = next_response(&mut dl_reply).await;
    assert!(envelope.success);
    let data = envelope.data.unwrap();
    assert_eq!(data["total_size"], serde_json::json!(31));
    assert_eq!(data["total_chunks"], serde_json::json!(1));

    let delivery = tokio::time::timeout(Duration::from_secs(2), dl_reply.next())
        .await
        .unwrap()
        .unwrap();
    delivery.acker.ack().await.unwrap();
    let frame: FileChunkResponse = serde_json::from_slice(&delivery.body).unwrap();
    assert!(frame.is_last_chunk);
    assert_eq!(frame.content, content);
}

#[tokio::test]
async fn chunked_upload_at_frame_boundary() {
    let h = start().await;
    let transaction = tx();

    // Exactly three full frames.
    let total = 3 * FRAME_LIMIT;
    let data: Vec<u8> = (0..total).map(|i| (i % 251) as u8).collect();

    let mut reply = reply_queue(
        &h.broker,
        FILEMANAGER_EXCHANGE,
        &[Operation::PostFileChunk.response_key(&transaction)],
    )
    .await;

    let mut slicer = FrameSlicer::new(total as u64, FRAME_LIMIT);
    let total_chunks = slicer.total_chunks();
    assert_eq!(total_chunks, 3);

    let mut frames = slicer.push(&data);
    if let Some(last) = slicer.finish().unwrap() {
        frames.push(last);
    }
    assert_eq!(frames.len(), 3);

    for frame in frames {
        publish(
            &h.broker,
            &Operation::PostFileChunk.request_key(),
            &FileChunkRequest {
                transaction_id: transaction.clone(),
                storage_id: None,
                filename: "big.bin".into(),
                chunk_index: frame.index,
                total_chunks,
                chunk_size: frame.payload.len() as u64,
                total_size: total as u64,
                content: frame.payload,
            },
        )
        .await;
    }

    // One envelope on the post.file response key, no per-frame responses.
    let response = next_response(&mut reply).await;
    assert!(response.success, "chunked upload failed: {:?}", response.error);
    assert_eq!(response.files.unwrap()[0].size, total as u64);
    assert_eq!(response.total_size, Some(total as u64));

    assert!(
        tokio::time::timeout(Duration::from_millis(100), reply.next())
            .await
            .is_err(),
        "only the terminal frame may produce a response"
    );
}

#[tokio::test]
async fn redelivered_chunk_is_idempotent() {
    let h = start().await;
    let transaction = tx();

    let mut reply = reply_queue(
        &h.broker,
        FILEMANAGER_EXCHANGE,
        &[Operation::PostFileChunk.response_key(&transaction)],
    )
    .await;

    let parts: [&[u8]; 3] = [b"aaaa", b"bbbb", b"cc"];
    // Indices 0, 1, 1 (redelivery), 2.
    for index in [0usize, 1, 1, 2] {
        publish(
            &h.broker,
            &Operation::PostFileChunk.request_key(),
            &FileChunkRequest {
                transaction_id: transaction.clone(),
                storage_id: None,
                filename: "dup.bin".into(),
                chunk_index: index as u32,
                total_chunks: 3,
                chunk_size: parts[index].len() as u64,
                total_size: 10,
                content: parts[index].to_vec(),
            },
        )
        .await;
    }

    let response = next_response(&mut reply).await;
    assert!(response.success, "upload failed: {:?}", response.error);
    assert_eq!(response.files.unwrap()[0].size, 10);

    // A terminal frame redelivered after completion is dropped: no second
    // response, no resurrected transaction.
    publish(
        &h.broker,
        &Operation::PostFileChunk.request_key(),
        &FileChunkRequest {
            transaction_id: transaction.clone(),
            storage_id: None,
            filename: "dup.bin".into(),
            chunk_index: 2,
            total_chunks: 3,
            chunk_size: parts[2].len() as u64,
            total_size: 10,
            content: parts[2].to_vec(),
        },
    )
    .await;
    assert!(
        tokio::time::timeout(Duration::from_millis(200), reply.next())
            .await
            .is_err(),
        "a late redelivered frame must not produce another response"
    );
}

#[tokio::test]
async fn incomplete_chunked_upload_stays_silent() {
    let h = start().await;
    let transaction = tx();

    let mut reply = reply_queue(
        &h.broker,
        FILEMANAGER_EXCHANGE,
        &[Operation::PostFileChunk.response_key(&transaction)],
    )
    .await;

    for index in [0u32, 2] {
        publish(
            &h.broker,
            &Operation::PostFileChunk.request_key(),
            &FileChunkRequest {
                transaction_id: transaction.clone(),
                storage_id: None,
                filename: "hole.bin".into(),
                chunk_index: index,
                total_chunks: 3,
                chunk_size: 4,
                total_size: 12,
                content: b"xxxx".to_vec(),
            },
        )
        .await;
    }

    // No terminal frame, no response; the caller's deadline handles it.
    assert!(
        tokio::time::timeout(Duration::from_millis(300), reply.next())
            .await
            .is_err()
    );
}

#[tokio::test]
async fn upload_with_storage_id_appends() {
    let h = start().await;

    // First upload mints the bucket.
    let tx1 = tx();
    let mut reply1 = reply_queue(
        &h.broker,
        FILEMANAGER_EXCHANGE,
        &[Operation::PostFile.response_key(&tx1)],
    )
    .await;
    publish(
        &h.broker,
        &Operation::PostFile.request_key(),
        &FileUploadRequest {
            transaction_id: tx1,
            storage_id: None,
            filename: "first.txt".into(),
            content: b"one".to_vec(),
            size: 3,
            is_chunked: false,
            chunk_index: None,
            total_chunks: None,
        },
    )
    .await;
    let first = next_response(&mut reply1).await;
    let storage_id = first.storage_id.unwrap();

    // Second upload reuses it.
    let tx2 = tx();
    let mut reply2 = reply_queue(
        &h.broker,
        FILEMANAGER_EXCHANGE,
        &[Operation::PostFile.response_key(&tx2)],
    )
    .await;
    publish(
        &h.broker,
        &Operation::PostFile.request_key(),
        &FileUploadRequest {
            transaction_id: tx2,
            storage_id: Some(storage_id.clone()),
            filename: "second.txt".into(),
            content: b"two!".to_vec(),
            size: 4,
            is_chunked: false,
            chunk_index: None,
            total_chunks: None,
        },
    )
    .await;
    let second = next_response(&mut reply2).await;
    assert!(second.success);
    assert_eq!(second.storage_id.as_deref(), Some(storage_id.as_str()));
    assert_eq!(second.files.unwrap().len(), 2);
}

#[tokio::test]
async fn post_files_uploads_several_at_once() {
    let h = start().await;
    let transaction = tx();

    let mut reply = reply_queue(
        &h.broker,
        FILEMANAGER_EXCHANGE,
        &[Operation::PostFiles.response_key(&transaction)],
    )
    .await;
    publish(
        &h.broker,
        &Operation::PostFiles.request_key(),
        &FilesUploadRequest {
            transaction_id: transaction,
            storage_id: None,
            files: vec![
                FilePayload {
                    filename: "a.txt".into(),
                    content: b"aaa".to_vec(),
                    size: 3,
                },
                FilePayload {
                    filename: "b.txt".into(),
                    content: b"bb".to_vec(),
                    size: 2,
                },
            ],
        },
    )
    .await;

    let response = next_response(&mut reply).await;
    assert!(response.success);
    assert_eq!(response.files.unwrap().len(), 2);
    assert_eq!(response.total_size, Some(5));
}

#[tokio::test]
async fn listing_unknown_bucket_is_empty_success() {
    let h = start().await;
    let transaction = tx();

    let mut reply = reply_queue(
        &h.broker,
        FILEMANAGER_EXCHANGE,
        &[Operation::GetFiles.response_key(&transaction)],
    )
    .await;
    publish(
        &h.broker,
        &Operation::GetFiles.request_key(),
        &FileManagerRequest {
            transaction_id: transaction,
            storage_id: Some("zzzzzzzzzz".into()),
            filename: None,
        },
    )
    .await;

    let response = next_response(&mut reply).await;
    assert!(response.success);
    assert_eq!(response.files.unwrap().len(), 0);
    assert_eq!(response.total_size, Some(0));
}

#[tokio::test]
async fn download_of_missing_file_fails_cleanly() {
    let h = start().await;
    let transaction = tx();

    let mut reply = reply_queue(
        &h.broker,
        FILEMANAGER_EXCHANGE,
        &[
            Operation::GetFile.response_key(&transaction),
            download_chunk_key(&transaction),
        ],
    )
    .await;
    publish(
        &h.broker,
        &Operation::GetFile.request_key(),
        &FileManagerRequest {
            transaction_id: transaction,
            storage_id: Some("zzzzzzzzzz".into()),
            filename: Some("f.txt".into()),
        },
    )
    .await;

    let response = next_response(&mut reply).await;
    assert!(!response.success);
    assert!(response.error.unwrap().contains("file not found"));
}

#[tokio::test]
async fn deletes_of_missing_things_fail() {
    let h = start().await;

    let tx1 = tx();
    let mut reply1 = reply_queue(
        &h.broker,
        FILEMANAGER_EXCHANGE,
        &[Operation::DeleteFile.response_key(&tx1)],
    )
    .await;
    publish(
        &h.broker,
        &Operation::DeleteFile.request_key(),
        &FileManagerRequest {
            transaction_id: tx1,
            storage_id: Some("zzzzzzzzzz".into()),
            filename: Some("ghost.txt".into()),
        },
    )
    .await;
    assert!(!next_response(&mut reply1).await.success);

    let tx2 = tx();
    let mut reply2 = reply_queue(
        &h.broker,
        FILEMANAGER_EXCHANGE,
        &[Operation::DeleteFolder.response_key(&tx2)],
    )
    .await;
    publish(
        &h.broker,
        &Operation::DeleteFolder.request_key(),
        &FileManagerRequest {
            transaction_id: tx2,
            storage_id: Some("zzzzzzzzzz".into()),
            filename: None,
        },
    )
    .await;
    assert!(!next_response(&mut reply2).await.success);
}

#[tokio::test]
async fn delete_file_then_listing_shrinks() {
    let h = start().await;

    let up_tx = tx();
    let mut up_reply = reply_queue(
        &h.broker,
        FILEMANAGER_EXCHANGE,
        &[Operation::PostFile.response_key(&up_tx)],
    )
    .await;
    publish(
        &h.broker,
        &Operation::PostFile.request_key(),
        &FileUploadRequest {
            transaction_id: up_tx,
            storage_id: None,
            filename: "doomed.txt".into(),
            content: b"bye".to_vec(),
            size: 3,
            is_chunked: false,
            chunk_index: None,
            total_chunks: None,
        },
    )
    .await;
    let storage_id = next_response(&mut up_reply).await.storage_id.unwrap();

    let del_tx = tx();
    let mut del_reply = reply_queue(
        &h.broker,
        FILEMANAGER_EXCHANGE,
        &[Operation::DeleteFile.response_key(&del_tx)],
    )
    .await;
    publish(
        &h.broker,
        &Operation::DeleteFile.request_key(),
        &FileManagerRequest {
            transaction_id: del_tx,
            storage_id: Some(storage_id.clone()),
            filename: Some("doomed.txt".into()),
        },
    )
    .await;
    assert!(next_response(&mut del_reply).await.success);

    let list_tx = tx();
    let mut list_reply = reply_queue(
        &h.broker,
        FILEMANAGER_EXCHANGE,
        &[Operation::GetFiles.response_key(&list_tx)],
    )
    .await;
    publish(
        &h.broker,
        &Operation::GetFiles.request_key(),
        &FileManagerRequest {
            transaction_id: list_tx,
            storage_id: Some(storage_id),
            filename: None,
        },
    )
    .await;
    assert_eq!(next_response(&mut list_reply).await.files.unwrap().len(), 0);
}

#[tokio::test]
async fn malformed_message_is_dropped_without_response() {
    let h = start().await;

    h.broker
        .publish(
            FILEMANAGER_EXCHANGE,
            &Operation::PostFile.request_key(),
            "application/json",
            b"{not json".to_vec(),
        )
        .await
        .unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while h.broker.nacked_dropped() == 0 {
        assert!(
            tokio::time::Instant::now() < deadline,
            "poisoned message was never nacked"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn bare_request_on_upload_queue_gets_failure_envelope() {
    let h = start().await;
    let transaction = tx();

    let mut reply = reply_queue(
        &h.broker,
        FILEMANAGER_EXCHANGE,
        &[Operation::PostFile.response_key(&transaction)],
    )
    .await;
    publish(
        &h.broker,
        &Operation::PostFile.request_key(),
        &FileManagerRequest {
            transaction_id: transaction,
            storage_id: None,
            filename: Some("no-content.txt".into()),
        },
    )
    .await;

    let response = next_response(&mut reply).await;
    assert!(!response.success);
    assert!(response.error.unwrap().contains("content"));
}

#[tokio::test]
async fn invalid_storage_id_rejected_with_envelope() {
    let h = start().await;
    let transaction = tx();

    let mut reply = reply_queue(
        &h.broker,
        FILEMANAGER_EXCHANGE,
        &[Operation::PostFile.response_key(&transaction)],
    )
    .await;
    publish(
        &h.broker,
        &Operation::PostFile.request_key(),
        &FileUploadRequest {
            transaction_id: transaction,
            storage_id: Some("NOT-VALID!".into()),
            filename: "a.txt".into(),
            content: b"x".to_vec(),
            size: 1,
            is_chunked: false,
            chunk_index: None,
            total_chunks: None,
        },
    )
    .await;

    let response = next_response(&mut reply).await;
    assert!(!response.success);
}

#[tokio::test]
async fn traversal_filename_rejected_with_envelope() {
    let h = start().await;
    let transaction = tx();

    let mut reply = reply_queue(
        &h.broker,
        FILEMANAGER_EXCHANGE,
        &[Operation::PostFile.response_key(&transaction)],
    )
    .await;
    publish(
        &h.broker,
        &Operation::PostFile.request_key(),
        &FileUploadRequest {
            transaction_id: transaction,
            storage_id: None,
            filename: "../../etc/passwd".into(),
            content: b"evil".to_vec(),
            size: 4,
            is_chunked: false,
            chunk_index: None,
            total_chunks: None,
        },
    )
    .await;

    let response = next_response(&mut reply).await;
    assert!(!response.success);
    assert!(response.error.unwrap().contains("invalid filename"));
}

#[tokio::test]
async fn diagnose_fanout_answered_healthy() {
    let h = start().await;
    let transaction = tx();

    let queue = h.broker.declare_queue(QueueSpec::reply()).await.unwrap();
    h.broker
        .bind(&queue, &diagnose_response_key("filemanager"), DIAGNOSE_EXCHANGE)
        .await
        .unwrap();
    let mut reply = h
        .broker
        .consume(&queue, ConsumeOptions::default())
        .await
        .unwrap();

    h.broker
        .publish(
            DIAGNOSE_EXCHANGE,
            "diagnose.services.all",
            "application/json",
            serde_json::to_vec(&DiagnoseMessage {
                transaction_id: transaction.clone(),
                operation: "all".into(),
                message: Some("are you up?".into()),
            })
            .unwrap(),
        )
        .await
        .unwrap();

    let delivery = tokio::time::timeout(Duration::from_secs(2), reply.next())
        .await
        .unwrap()
        .unwrap();
    delivery.acker.ack().await.unwrap();
    let response: DiagnoseResponse = serde_json::from_slice(&delivery.body).unwrap();
    assert_eq!(response.transaction_id, transaction);
    assert_eq!(response.service_name, "filemanager");
    assert_eq!(response.data.unwrap()["status"], serde_json::json!("healthy"));
}
