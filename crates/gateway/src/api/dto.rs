use serde::{Deserialize, Serialize};

use barge_protocol::DiagnoseResponse;

/// Query parameters for `POST /files/upload`.
#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    #[serde(default)]
    pub storage_id: Option<String>,
}

/// One uploaded file as reported back to the client.
#[derive(Debug, Clone, Serialize)]
pub struct UploadedFile {
    pub original_name: String,
    pub file_name: String,
    pub size: u64,
    pub path: String,
}

/// Payload of a successful upload.
#[derive(Debug, Serialize)]
pub struct UploadData {
    pub url: String,
    pub storage_id: String,
    pub files: Vec<UploadedFile>,
    pub total_size: u64,
    pub file_count: usize,
}

/// One listed file.
#[derive(Debug, Serialize)]
pub struct ListedFile {
    pub name: String,
    pub filename: String,
    pub size: u64,
    pub url: String,
}

/// Payload of a successful listing.
#[derive(Debug, Serialize)]
pub struct ListData {
    pub storage_id: String,
    pub files: Vec<ListedFile>,
    pub total_size: u64,
}

/// Uniform response wrapper: `{status, data, error}`.
#[derive(Debug, Serialize)]
pub struct Envelope<T: Serialize> {
    pub status: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            status: true,
            data: Some(data),
            error: None,
        }
    }
}

/// Payload of the diagnose fan-out test route.
#[derive(Debug, Serialize)]
pub struct DiagnoseData {
    pub services: Vec<DiagnoseResponse>,
}
