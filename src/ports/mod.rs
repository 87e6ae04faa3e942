//! Ports - Interfaces for external dependencies.
//!
//! Following hexagonal architecture, ports define the contracts between
//! the session core and the outside world. Adapters implement these ports.
//!
//! ## Assistant
//!
//! - `AIProvider` - Streaming and structured completions from the hosted model
//!
//! ## Persistence
//!
//! - `BlobStore` - Whole-blob key-value storage for user, settings and conversations
//!
//! ## Speech
//!
//! - `SpeechSynthesizer` - Text-to-speech output
//! - `SpeechRecognizer` - Speech-to-text input, reporting via `RecognitionEvent`

mod ai_provider;
mod blob_store;
mod speech;

pub use ai_provider::{
    AIError, AIProvider, ChunkStream, CompletionRequest, CompletionResponse, FinishReason,
    Message, MessageRole, ProviderInfo, RequestMetadata, StreamChunk, TokenUsage,
};
pub use blob_store::{BlobStore, BlobStoreError};
pub use speech::{RecognitionEvent, SpeechError, SpeechRecognizer, SpeechSynthesizer, Utterance};
