//! Storage port and local filesystem backend.
//!
//! A *bucket* is a flat collection of named files addressed by a 10-character
//! lowercase alphanumeric [`StorageId`]. The [`Storage`] trait is the
//! filemanager's only view of physical I/O.

mod id;
mod local;

pub use id::StorageId;
pub use local::LocalStorage;

use async_trait::async_trait;

/// Metadata for one stored file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub filename: String,
    pub size: u64,
}

/// Errors from the storage backend.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("storage not found: {0}")]
    BucketNotFound(String),

    #[error("invalid storage id: {0}")]
    InvalidId(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Byte-addressable bucket store.
///
/// Implementations own durability and atomicity: a failed `save` must not
/// leave a partial file behind.
#[async_trait]
pub trait Storage: Send + Sync + 'static {
    /// Writes `bytes` to `<storage_id>/<filename>`, creating the bucket if
    /// needed. Overwrites an existing file of the same name.
    async fn save(
        &self,
        storage_id: &StorageId,
        filename: &str,
        bytes: &[u8],
    ) -> Result<(), StorageError>;

    /// Size in bytes of one file.
    async fn size(&self, storage_id: &StorageId, filename: &str) -> Result<u64, StorageError>;

    /// Reads up to `len` bytes starting at `offset`.
    ///
    /// The download path reads one frame at a time through this, so a file
    /// never has to fit in memory as a whole.
    async fn read_range(
        &self,
        storage_id: &StorageId,
        filename: &str,
        offset: u64,
        len: usize,
    ) -> Result<Vec<u8>, StorageError>;

    /// Lists the bucket's files. An absent bucket lists as empty, not as an
    /// error.
    async fn list(&self, storage_id: &StorageId) -> Result<Vec<FileEntry>, StorageError>;

    /// Removes one file. Absence is an error.
    async fn delete_file(&self, storage_id: &StorageId, filename: &str)
    -> Result<(), StorageError>;

    /// Removes the whole bucket. Absence is an error.
    async fn delete_bucket(&self, storage_id: &StorageId) -> Result<(), StorageError>;
}
