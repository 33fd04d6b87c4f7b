use std::sync::Arc;

use barge_storage::{FileEntry, Storage, StorageError, StorageId};
use barge_transfer::{TransferError, validate_filename};

/// Errors from the operation layer, formatted into failure envelopes by
/// the handlers.
#[derive(Debug, thiserror::Error)]
pub enum OpsError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Transfer(#[from] TransferError),
}

/// Result of a completed upload: the bucket it landed in, the bucket's
/// full listing, and the byte count written by this request.
pub struct UploadOutcome {
    pub storage_id: StorageId,
    pub files: Vec<FileEntry>,
    pub total_size: u64,
}

/// Storage-facing operation layer.
///
/// Owns the rules that sit above raw I/O: storage-id minting and
/// validation, filename validation, and listing aggregation.
pub struct FileOps<S> {
    storage: Arc<S>,
}

impl<S: Storage> FileOps<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Self { storage }
    }

    /// Resolves an optional caller-supplied id: validates it if present,
    /// mints a fresh one otherwise.
    fn resolve_id(storage_id: Option<&str>) -> Result<StorageId, OpsError> {
        match storage_id {
            Some(s) if !s.is_empty() => Ok(StorageId::parse(s)?),
            _ => Ok(StorageId::mint()),
        }
    }

    /// Saves one file, minting a bucket when no id is supplied.
    pub async fn save_file(
        &self,
        storage_id: Option<&str>,
        filename: &str,
        bytes: &[u8],
    ) -> Result<UploadOutcome, OpsError> {
        validate_filename(filename)?;
        let id = Self::resolve_id(storage_id)?;

        self.storage.save(&id, filename, bytes).await?;
        let files = self.storage.list(&id).await?;
        Ok(UploadOutcome {
            storage_id: id,
            files,
            total_size: bytes.len() as u64,
        })
    }

    /// Saves several files into one bucket.
    pub async fn save_files(
        &self,
        storage_id: Option<&str>,
        files: &[(String, Vec<u8>)],
    ) -> Result<UploadOutcome, OpsError> {
        for (filename, _) in files {
            validate_filename(filename)?;
        }
        let id = Self::resolve_id(storage_id)?;

        let mut written = 0u64;
        for (filename, bytes) in files {
            self.storage.save(&id, filename, bytes).await?;
            written += bytes.len() as u64;
        }
        let listing = self.storage.list(&id).await?;
        Ok(UploadOutcome {
            storage_id: id,
            files: listing,
            total_size: written,
        })
    }

    /// Size of one stored file.
    pub async fn file_size(&self, storage_id: &str, filename: &str) -> Result<u64, OpsError> {
        validate_filename(filename)?;
        let id = StorageId::parse(storage_id)?;
        Ok(self.storage.size(&id, filename).await?)
    }

    /// One frame worth of file content.
    pub async fn read_range(
        &self,
        storage_id: &str,
        filename: &str,
        offset: u64,
        len: usize,
    ) -> Result<Vec<u8>, OpsError> {
        let id = StorageId::parse(storage_id)?;
        Ok(self.storage.read_range(&id, filename, offset, len).await?)
    }

    /// Bucket listing plus aggregate size. An absent bucket is empty.
    pub async fn list(&self, storage_id: &str) -> Result<(Vec<FileEntry>, u64), OpsError> {
        let id = StorageId::parse(storage_id)?;
        let files = self.storage.list(&id).await?;
        let total = files.iter().map(|f| f.size).sum();
        Ok((files, total))
    }

    pub async fn delete_file(&self, storage_id: &str, filename: &str) -> Result<(), OpsError> {
        validate_filename(filename)?;
        let id = StorageId::parse(storage_id)?;
        Ok(self.storage.delete_file(&id, filename).await?)
    }

    pub async fn delete_bucket(&self, storage_id: &str) -> Result<(), OpsError> {
        let id = StorageId::parse(storage_id)?;
        Ok(self.storage.delete_bucket(&id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use barge_storage::LocalStorage;

    async fn ops() -> (tempfile::TempDir, FileOps<LocalStorage>) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(LocalStorage::new(dir.path()).await.unwrap());
        (dir, FileOps::new(storage))
    }

    #[tokio::test]
    async fn save_without_id_mints_bucket() {
        let (_dir, ops) = ops().await;
        let outcome = ops.save_file(None, "a.txt", b"hello").await.unwrap();
        assert_eq!(outcome.storage_id.as_str().len(), 10);
        assert_eq!(outcome.total_size, 5);
        assert_eq!(outcome.files.len(), 1);
        assert_eq!(outcome.files[0].filename, "a.txt");
    }

    #[tokio::test]
    async fn save_with_id_appends_to_bucket() {
        let (_dir, ops) = ops().await;
        let first = ops.save_file(None, "a.txt", b"aa").await.unwrap();
        let id = first.storage_id.as_str().to_string();

        let second = ops.save_file(Some(&id), "b.txt", b"bbb").await.unwrap();
        assert_eq!(second.storage_id.as_str(), id);
        assert_eq!(second.files.len(), 2);
        assert_eq!(second.total_size, 3);
    }

    #[tokio::test]
    async fn save_files_reports_written_total() {
        let (_dir, ops) = ops().await;
        let files = vec![
            ("a.txt".to_string(), b"aaa".to_vec()),
            ("b.txt".to_string(), b"bb".to_vec()),
        ];
        let outcome = ops.save_files(None, &files).await.unwrap();
        assert_eq!(outcome.total_size, 5);
        assert_eq!(outcome.files.len(), 2);
    }

    #[tokio::test]
    async fn traversal_filename_rejected_before_any_write() {
        let (_dir, ops) = ops().await;
        assert!(ops.save_file(None, "../evil", b"x").await.is_err());
        assert!(ops.save_file(None, "sub/nested", b"x").await.is_err());
        assert!(ops.save_file(None, "", b"x").await.is_err());
    }

    #[tokio::test]
    async fn malformed_supplied_id_rejected() {
        let (_dir, ops) = ops().await;
        assert!(ops.save_file(Some("TOOSHORT"), "a.txt", b"x").await.is_err());
        assert!(ops.list("UPPERCASE!").await.is_err());
    }

    #[tokio::test]
    async fn list_of_unknown_bucket_is_empty() {
        let (_dir, ops) = ops().await;
        let (files, total) = ops.list("zzzzzzzzzz").await.unwrap();
        assert!(files.is_empty());
        assert_eq!(total, 0);
    }

    #[tokio::test]
    async fn delete_missing_file_fails() {
        let (_dir, ops) = ops().await;
        assert!(ops.delete_file("zzzzzzzzzz", "nope.txt").await.is_err());
        assert!(ops.delete_bucket("zzzzzzzzzz").await.is_err());
    }
}
