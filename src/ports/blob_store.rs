//! Blob Store Port - Interface for the key-value persistence of client state.
//!
//! Values are opaque serialized blobs, read in full and written in full.
//! There are no partial updates.

use async_trait::async_trait;

/// Errors that can occur during blob store operations
#[derive(Debug, thiserror::Error)]
pub enum BlobStoreError {
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Failed to serialize value: {0}")]
    SerializationFailed(String),

    #[error("Failed to deserialize value: {0}")]
    DeserializationFailed(String),
}

/// Port for reading and writing whole blobs by key
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Read the blob stored under `key`
    ///
    /// # Returns
    /// `None` if nothing is stored under the key
    async fn get(&self, key: &str) -> Result<Option<String>, BlobStoreError>;

    /// Replace the blob stored under `key`
    async fn put(&self, key: &str, value: &str) -> Result<(), BlobStoreError>;

    /// Remove the blob stored under `key`
    ///
    /// Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<(), BlobStoreError>;
}
