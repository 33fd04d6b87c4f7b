use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// File operation payloads
// ---------------------------------------------------------------------------

/// Metadata about one stored file, as reported in responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub filename: String,
    pub size: u64,
}

/// Request for operations that carry no file content: listing, download
/// initiation, deletions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileManagerRequest {
    pub transaction_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

/// Single-message upload: the whole file rides in one frame.
///
/// The `content` field is base64-encoded in JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileUploadRequest {
    pub transaction_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_id: Option<String>,
    pub filename: String,
    #[serde(with = "base64_bytes")]
    pub content: Vec<u8>,
    pub size: u64,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_chunked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_chunks: Option<u32>,
}

/// One file within a multi-file upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilePayload {
    pub filename: String,
    #[serde(with = "base64_bytes")]
    pub content: Vec<u8>,
    pub size: u64,
}

/// Multi-file upload. A supplied `storage_id` appends to that bucket; an
/// absent one mints a new bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilesUploadRequest {
    pub transaction_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_id: Option<String>,
    pub files: Vec<FilePayload>,
}

/// One frame of a streaming upload.
///
/// For a given transaction, `total_chunks` and `total_size` are constant
/// across frames and indices form the contiguous range `[0, total_chunks)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileChunkRequest {
    pub transaction_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_id: Option<String>,
    pub filename: String,
    pub chunk_index: u32,
    pub total_chunks: u32,
    pub chunk_size: u64,
    pub total_size: u64,
    #[serde(with = "base64_bytes")]
    pub content: Vec<u8>,
}

/// One frame of a download's chunk stream.
///
/// Carries `total_chunks` on every frame so the receiver can size its
/// collector from whichever frame arrives first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileChunkResponse {
    pub transaction_id: String,
    pub storage_id: String,
    pub filename: String,
    pub chunk_index: u32,
    pub total_chunks: u32,
    pub chunk_size: u64,
    pub total_size: u64,
    #[serde(with = "base64_bytes")]
    pub content: Vec<u8>,
    pub is_last_chunk: bool,
}

/// Response envelope for every operation. Also the initial metadata
/// message of a download, in which case `data` carries `total_size` and
/// `total_chunks`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct FileManagerResponse {
    pub transaction_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<FileInfo>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<HashMap<String, serde_json::Value>>,
}

impl FileManagerResponse {
    /// A failure envelope with a human-readable error.
    pub fn failure(transaction_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Diagnose payloads
// ---------------------------------------------------------------------------

/// Outcome of handling a diagnose request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiagnoseStatus {
    #[serde(rename = "received")]
    Received,
    #[serde(rename = "processed")]
    Processed,
    #[serde(rename = "error")]
    Error,
}

/// Health-check fan-out sent on `diagnose.services.<operation>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnoseMessage {
    pub transaction_id: String,
    pub operation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Per-service answer on `diagnose.services.response.<service>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnoseResponse {
    pub transaction_id: String,
    pub service_name: String,
    pub operation: String,
    pub status: DiagnoseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<HashMap<String, serde_json::Value>>,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn is_false(v: &bool) -> bool {
    !v
}

/// Custom base64 serde module matching Go's automatic `[]byte` ↔ base64 encoding.
mod base64_bytes {
    use base64::{Engine, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        STANDARD.encode(data).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}
