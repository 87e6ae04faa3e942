//! Mock AI Provider for testing.
//!
//! Provides a configurable mock implementation of the AIProvider port,
//! allowing tests and offline runs to work without calling a real model.
//!
//! # Features
//!
//! - Scripted streaming replies, chunk by chunk
//! - Mid-stream failure injection
//! - Completion replies keyed by a fragment of the prompt
//! - Simulated latency (before the stream and between chunks)
//! - Call tracking for verification
//!
//! # Example
//!
//! ```ignore
//! let provider = MockAIProvider::new()
//!     .with_stream_chunks(["Hi", " there"])
//!     .with_completion_for("title", "Greetings");
//!
//! let mut stream = provider.stream_complete(request).await?;
//! ```

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;

use crate::ports::{
    AIError, AIProvider, ChunkStream, CompletionRequest, CompletionResponse, FinishReason,
    ProviderInfo, StreamChunk, TokenUsage,
};

/// Content returned once the scripted queues are exhausted.
const DEFAULT_MOCK_CONTENT: &str = "Mock response";

/// Mock AI provider for testing.
#[derive(Debug, Clone)]
pub struct MockAIProvider {
    script: Arc<Mutex<MockScript>>,
    info: ProviderInfo,
    /// Simulated latency before a reply starts.
    delay: Duration,
    /// Simulated latency between streamed chunks.
    chunk_delay: Duration,
    calls: Arc<Mutex<Vec<CompletionRequest>>>,
}

#[derive(Debug, Default)]
struct MockScript {
    streams: VecDeque<MockResponse>,
    completions: VecDeque<MockResponse>,
    keyed: Vec<(String, MockResponse)>,
}

/// A configured mock response.
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// Stream the given chunks, then either finish or fail.
    Chunks {
        deltas: Vec<String>,
        fail_with: Option<MockError>,
    },
    /// Fail before any chunk is produced.
    Error(MockError),
}

impl MockResponse {
    /// A reply split into word-sized chunks whose concatenation is `content`.
    pub fn text(content: &str) -> Self {
        Self::Chunks {
            deltas: content.split_inclusive(' ').map(str::to_string).collect(),
            fail_with: None,
        }
    }
}

/// Mock error types for testing error handling.
#[derive(Debug, Clone)]
pub enum MockError {
    RateLimited { retry_after_secs: u32 },
    ContentFiltered { reason: String },
    Unavailable { message: String },
    AuthenticationFailed,
    Network { message: String },
    Timeout { timeout_secs: u32 },
}

impl From<MockError> for AIError {
    fn from(err: MockError) -> Self {
        match err {
            MockError::RateLimited { retry_after_secs } => AIError::rate_limited(retry_after_secs),
            MockError::ContentFiltered { reason } => AIError::content_filtered(reason),
            MockError::Unavailable { message } => AIError::unavailable(message),
            MockError::AuthenticationFailed => AIError::AuthenticationFailed,
            MockError::Network { message } => AIError::network(message),
            MockError::Timeout { timeout_secs } => AIError::Timeout { timeout_secs },
        }
    }
}

impl Default for MockAIProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockAIProvider {
    /// Creates a new mock provider with default settings.
    pub fn new() -> Self {
        Self {
            script: Arc::new(Mutex::new(MockScript::default())),
            info: ProviderInfo::new("mock", "mock-model-1").with_structured_output(true),
            delay: Duration::ZERO,
            chunk_delay: Duration::ZERO,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Queues a streamed reply built from `content`.
    pub fn with_response(self, content: impl AsRef<str>) -> Self {
        self.push_stream(MockResponse::text(content.as_ref()))
    }

    /// Queues a streamed reply made of exactly these chunks.
    pub fn with_stream_chunks<I, S>(self, deltas: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.push_stream(MockResponse::Chunks {
            deltas: deltas.into_iter().map(Into::into).collect(),
            fail_with: None,
        })
    }

    /// Queues a streamed reply that emits `deltas` and then fails.
    pub fn with_stream_failure_after<I, S>(self, deltas: I, error: MockError) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.push_stream(MockResponse::Chunks {
            deltas: deltas.into_iter().map(Into::into).collect(),
            fail_with: Some(error),
        })
    }

    /// Queues a streaming call that fails before producing anything.
    pub fn with_stream_error(self, error: MockError) -> Self {
        self.push_stream(MockResponse::Error(error))
    }

    /// Queues a non-streaming reply.
    pub fn with_completion(self, content: impl AsRef<str>) -> Self {
        self.script
            .lock()
            .unwrap()
            .completions
            .push_back(MockResponse::text(content.as_ref()));
        self
    }

    /// Queues a non-streaming reply used only for prompts containing `needle`.
    pub fn with_completion_for(self, needle: impl Into<String>, content: impl AsRef<str>) -> Self {
        self.script
            .lock()
            .unwrap()
            .keyed
            .push((needle.into(), MockResponse::text(content.as_ref())));
        self
    }

    /// Queues a non-streaming failure for prompts containing `needle`.
    pub fn with_completion_error_for(self, needle: impl Into<String>, error: MockError) -> Self {
        self.script
            .lock()
            .unwrap()
            .keyed
            .push((needle.into(), MockResponse::Error(error)));
        self
    }

    /// Sets simulated latency before each reply.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Sets simulated latency between streamed chunks.
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    /// Returns the number of calls made to this provider.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Returns all recorded calls.
    pub fn get_calls(&self) -> Vec<CompletionRequest> {
        self.calls.lock().unwrap().clone()
    }

    /// Returns recorded streaming calls, i.e. conversational turns.
    pub fn stream_calls(&self) -> Vec<CompletionRequest> {
        self.get_calls()
            .into_iter()
            .filter(|r| r.metadata.trace_id.starts_with("turn-"))
            .collect()
    }

    fn push_stream(self, response: MockResponse) -> Self {
        self.script.lock().unwrap().streams.push_back(response);
        self
    }

    fn next_stream(&self) -> MockResponse {
        self.script
            .lock()
            .unwrap()
            .streams
            .pop_front()
            .unwrap_or_else(|| MockResponse::text(DEFAULT_MOCK_CONTENT))
    }

    fn next_completion(&self, request: &CompletionRequest) -> MockResponse {
        let prompt = request.last_user_text().unwrap_or_default();
        let mut script = self.script.lock().unwrap();

        if let Some(pos) = script
            .keyed
            .iter()
            .position(|(needle, _)| prompt.contains(needle.as_str()))
        {
            return script.keyed.remove(pos).1;
        }
        script
            .completions
            .pop_front()
            .unwrap_or_else(|| MockResponse::text(DEFAULT_MOCK_CONTENT))
    }
}

#[async_trait]
impl AIProvider for MockAIProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, AIError> {
        let response = self.next_completion(&request);
        self.calls.lock().unwrap().push(request);

        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }

        match response {
            MockResponse::Chunks {
                fail_with: Some(err),
                ..
            }
            | MockResponse::Error(err) => Err(err.into()),
            MockResponse::Chunks { deltas, .. } => {
                let content = deltas.concat();
                Ok(CompletionResponse {
                    usage: TokenUsage::new(10, content.len() as u32 / 4),
                    content,
                    model: self.info.model.clone(),
                    finish_reason: FinishReason::Stop,
                })
            }
        }
    }

    async fn stream_complete(&self, request: CompletionRequest) -> Result<ChunkStream, AIError> {
        self.calls.lock().unwrap().push(request);

        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }

        let (deltas, fail_with) = match self.next_stream() {
            MockResponse::Error(err) => return Err(err.into()),
            MockResponse::Chunks { deltas, fail_with } => (deltas, fail_with),
        };

        let chunk_delay = self.chunk_delay;
        let chunks = stream::iter(deltas).then(move |delta| async move {
            if !chunk_delay.is_zero() {
                sleep(chunk_delay).await;
            }
            Ok(StreamChunk::content(delta))
        });

        let tail = match fail_with {
            Some(err) => Err(AIError::from(err)),
            None => Ok(StreamChunk::final_chunk(FinishReason::Stop, TokenUsage::new(10, 20))),
        };

        Ok(Box::pin(chunks.chain(stream::once(async move { tail }))))
    }

    fn provider_info(&self) -> ProviderInfo {
        self.info.clone()
    }
}
