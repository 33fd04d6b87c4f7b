use serde::{Deserialize, Serialize};

/// Topic exchange carrying all file operations and their responses.
pub const FILEMANAGER_EXCHANGE: &str = "filemanager";

/// Topic exchange for service health fan-outs.
pub const DIAGNOSE_EXCHANGE: &str = "diagnose";

/// Binding pattern a service uses to receive every diagnose request
/// (`diagnose.services.all`, `.health`, `.status`, `.load`).
pub const DIAGNOSE_REQUEST_PATTERN: &str = "diagnose.services.*";

/// Maximum raw (pre-base64) bytes carried by one frame: 1 MiB.
pub const FRAME_LIMIT: usize = 1024 * 1024;

/// A file operation routed over the `filemanager` exchange.
///
/// The request routing key doubles as the queue name on the filemanager
/// side, so `Operation` is the single source of truth for the topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    #[serde(rename = "post.file")]
    PostFile,
    #[serde(rename = "post.file.chunk")]
    PostFileChunk,
    #[serde(rename = "post.files")]
    PostFiles,
    #[serde(rename = "get.file")]
    GetFile,
    #[serde(rename = "get.files")]
    GetFiles,
    #[serde(rename = "delete.file")]
    DeleteFile,
    #[serde(rename = "delete.folder")]
    DeleteFolder,
}

impl Operation {
    /// Every operation, in topology-declaration order.
    pub const ALL: [Operation; 7] = [
        Operation::PostFile,
        Operation::PostFileChunk,
        Operation::PostFiles,
        Operation::GetFile,
        Operation::GetFiles,
        Operation::DeleteFile,
        Operation::DeleteFolder,
    ];

    /// The operation suffix, e.g. `post.file`.
    pub fn name(self) -> &'static str {
        match self {
            Operation::PostFile => "post.file",
            Operation::PostFileChunk => "post.file.chunk",
            Operation::PostFiles => "post.files",
            Operation::GetFile => "get.file",
            Operation::GetFiles => "get.files",
            Operation::DeleteFile => "delete.file",
            Operation::DeleteFolder => "delete.folder",
        }
    }

    /// Routing key the gateway publishes requests on. Also the durable
    /// queue name bound to it.
    pub fn request_key(self) -> String {
        format!("{FILEMANAGER_EXCHANGE}.{}", self.name())
    }

    /// Routing key the filemanager publishes this operation's response on.
    ///
    /// Chunked uploads respond on the `post.file` key, not `post.file.chunk`,
    /// so a caller binds one key regardless of which upload path was taken.
    pub fn response_key(self, transaction_id: &str) -> String {
        let op = match self {
            Operation::PostFileChunk => Operation::PostFile,
            other => other,
        };
        format!("{FILEMANAGER_EXCHANGE}.response.{}.{transaction_id}", op.name())
    }
}

/// Routing key for the chunk stream of a download.
///
/// Distinct from [`Operation::GetFile`]'s response key: the metadata
/// envelope and the frames travel on separate keys bound to the same
/// reply queue.
pub fn download_chunk_key(transaction_id: &str) -> String {
    format!("{FILEMANAGER_EXCHANGE}.response.get.file.chunk.{transaction_id}")
}

/// Routing key a service answers diagnose requests on.
pub fn diagnose_response_key(service: &str) -> String {
    format!("diagnose.services.response.{service}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_key_matches_queue_name() {
        assert_eq!(Operation::PostFile.request_key(), "filemanager.post.file");
        assert_eq!(
            Operation::DeleteFolder.request_key(),
            "filemanager.delete.folder"
        );
    }

    #[test]
    fn response_key_carries_transaction() {
        assert_eq!(
            Operation::GetFiles.response_key("tx-1"),
            "filemanager.response.get.files.tx-1"
        );
    }

    #[test]
    fn chunk_upload_responds_on_post_file_key() {
        assert_eq!(
            Operation::PostFileChunk.response_key("abc"),
            Operation::PostFile.response_key("abc")
        );
    }

    #[test]
    fn download_chunk_key_format() {
        assert_eq!(
            download_chunk_key("tx-9"),
            "filemanager.response.get.file.chunk.tx-9"
        );
    }

    #[test]
    fn operation_serde_uses_dotted_names() {
        let json = serde_json::to_string(&Operation::PostFileChunk).unwrap();
        assert_eq!(json, "\"post.file.chunk\"");
        let parsed: Operation = serde_json::from_str("\"delete.folder\"").unwrap();
        assert_eq!(parsed, Operation::DeleteFolder);
    }

    #[test]
    fn all_covers_every_queue() {
        let keys: Vec<String> = Operation::ALL.iter().map(|o| o.request_key()).collect();
        assert_eq!(keys.len(), 7);
        // Names are unique.
        let mut dedup = keys.clone();
        dedup.sort();
        dedup.dedup();
        assert_eq!(dedup.len(), keys.len());
    }
}
