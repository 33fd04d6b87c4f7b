//! Wire-format definitions shared by the gateway and the filemanager.
//!
//! Everything that crosses the broker is described here: exchange names,
//! routing keys, the frame limit, and the JSON payload schemas. Neither
//! service defines its own message types.

mod constants;
mod messages;

pub use constants::{
    DIAGNOSE_EXCHANGE, DIAGNOSE_REQUEST_PATTERN, FILEMANAGER_EXCHANGE, FRAME_LIMIT, Operation,
    diagnose_response_key, download_chunk_key,
};
pub use messages::{
    DiagnoseMessage, DiagnoseResponse, DiagnoseStatus, FileChunkRequest, FileChunkResponse,
    FileInfo, FileManagerRequest, FileManagerResponse, FilePayload, FileUploadRequest,
    FilesUploadRequest,
};
