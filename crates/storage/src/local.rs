use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::{FileEntry, Storage, StorageError, StorageId};

/// Filesystem-backed bucket store.
///
/// Each bucket is a subdirectory of `base_dir` named by its storage id;
/// files are flat regular files inside it. Writes go through a temp file in
/// the bucket directory followed by a rename, so readers never observe a
/// half-written file and a failed write leaves nothing behind.
pub struct LocalStorage {
    base_dir: PathBuf,
}

impl LocalStorage {
    /// Opens (and creates, if needed) the base directory.
    pub async fn new(base_dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let base_dir = base_dir.into();
        tokio::fs::create_dir_all(&base_dir).await?;
        Ok(Self { base_dir })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn bucket_dir(&self, storage_id: &StorageId) -> PathBuf {
        self.base_dir.join(storage_id.as_str())
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn save(
        &self,
        storage_id: &StorageId,
        filename: &str,
        bytes: &[u8],
    ) -> Result<(), StorageError> {
        let dir = self.bucket_dir(storage_id);
        tokio::fs::create_dir_all(&dir).await?;

        let tmp = dir.join(format!(".{filename}.part"));
        let dest = dir.join(filename);

        if let Err(e) = tokio::fs::write(&tmp, bytes).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        if let Err(e) = tokio::fs::rename(&tmp, &dest).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn size(&self, storage_id: &StorageId, filename: &str) -> Result<u64, StorageError> {
        let path = self.bucket_dir(storage_id).join(filename);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(meta.len()),
            Ok(_) => Err(StorageError::FileNotFound(filename.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::FileNotFound(filename.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn read_range(
        &self,
        storage_id: &StorageId,
        filename: &str,
        offset: u64,
        len: usize,
    ) -> Result<Vec<u8>, StorageError> {
        use tokio::io::{AsyncReadExt, AsyncSeekExt};

        let path = self.bucket_dir(storage_id).join(filename);
        let mut file = match tokio::fs::File::open(&path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::FileNotFound(filename.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        file.seek(std::io::SeekFrom::Start(offset)).await?;
        let mut buf = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            let n = file.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf.truncate(filled);
        Ok(buf)
    }

    async fn list(&self, storage_id: &StorageId) -> Result<Vec<FileEntry>, StorageError> {
        let dir = self.bucket_dir(storage_id);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(rd) => rd,
            // An absent bucket lists as empty.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let meta = match entry.metadata().await {
                Ok(m) => m,
                Err(_) => continue,
            };
            if !meta.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            // In-flight temp files are not part of the bucket's contents.
            if name.starts_with('.') && name.ends_with(".part") {
                continue;
            }
            files.push(FileEntry {
                filename: name,
                size: meta.len(),
            });
        }
        files.sort_by(|a, b| a.filename.cmp(&b.filename));
        Ok(files)
    }

    async fn delete_file(
        &self,
        storage_id: &StorageId,
        filename: &str,
    ) -> Result<(), StorageError> {
        let path = self.bucket_dir(storage_id).join(filename);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::FileNotFound(filename.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_bucket(&self, storage_id: &StorageId) -> Result<(), StorageError> {
        let dir = self.bucket_dir(storage_id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::BucketNotFound(storage_id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}
