//! Adapters - Implementations of port interfaces.
//!
//! Adapters connect the session core to external systems:
//! - `ai` - Gemini over HTTP, plus a scriptable mock
//! - `storage` - Blob stores on disk and in memory
//! - `speech` - Synthesizer and recognizer stand-ins for headless use

pub mod ai;
pub mod speech;
pub mod storage;

pub use ai::{GeminiConfig, GeminiProvider, MockAIProvider};
pub use speech::{RecordingSynthesizer, ScriptedRecognizer};
pub use storage::{FileBlobStore, InMemoryBlobStore};
