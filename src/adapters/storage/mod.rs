//! Storage Adapters
//!
//! Implementations of the BlobStore port for persisting client state.
//!
//! ## Available Adapters
//!
//! - **FileBlobStore** - Stores each key as a JSON file on disk
//! - **InMemoryBlobStore** - Stores blobs in memory (testing/development)
//!
//! ## Usage
//!
//! ```ignore
//! use adapters::storage::{FileBlobStore, InMemoryBlobStore};
//!
//! // Production: file-based storage
//! let store = FileBlobStore::new("./data");
//!
//! // Testing: in-memory storage
//! let store = InMemoryBlobStore::new();
//! ```

mod file_blob_store;
mod in_memory_blob_store;

pub use file_blob_store::FileBlobStore;
pub use in_memory_blob_store::InMemoryBlobStore;
