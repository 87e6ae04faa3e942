//! File-based Blob Store Adapter
//!
//! Stores each key as `<base_path>/<key>.json`. Writes go to a temporary
//! sibling file first and are renamed into place, so a crash mid-write
//! never leaves a truncated blob behind.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::ports::{BlobStore, BlobStoreError};

/// File-based storage for client blobs
#[derive(Debug, Clone)]
pub struct FileBlobStore {
    base_path: PathBuf,
}

impl FileBlobStore {
    /// Create a new file store rooted at `base_path`
    ///
    /// The directory is created lazily on the first write.
    pub fn new<P: AsRef<Path>>(base_path: P) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
        }
    }

    /// Keys become file names, so only a conservative character set is allowed
    fn blob_path(&self, key: &str) -> Result<PathBuf, BlobStoreError> {
        let valid = !key.is_empty()
            && !key.starts_with('.')
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'));

        if !valid {
            return Err(BlobStoreError::InvalidKey(key.to_string()));
        }
        Ok(self.base_path.join(format!("{}.json", key)))
    }

    async fn ensure_dir(&self) -> Result<(), BlobStoreError> {
        fs::create_dir_all(&self.base_path)
            .await
            .map_err(|e| BlobStoreError::IoError(e.to_string()))
    }
}

#[async_trait]
impl BlobStore for FileBlobStore {
    async fn get(&self, key: &str) -> Result<Option<String>, BlobStoreError> {
        let path = self.blob_path(key)?;

        match fs::read_to_string(&path).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(BlobStoreError::IoError(e.to_string())),
        }
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), BlobStoreError> {
        let path = self.blob_path(key)?;
        self.ensure_dir().await?;

        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, value)
            .await
            .map_err(|e| BlobStoreError::IoError(e.to_string()))?;
        fs::rename(&tmp_path, &path)
            .await
            .map_err(|e| BlobStoreError::IoError(e.to_string()))?;

        tracing::trace!(key, bytes = value.len(), "Blob written");
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), BlobStoreError> {
        let path = self.blob_path(key)?;

        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BlobStoreError::IoError(e.to_string())),
        }
    }
}
