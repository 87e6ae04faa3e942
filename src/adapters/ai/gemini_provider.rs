//! Gemini Provider - Implementation of AIProvider for Google's Gemini API.
//!
//! Conversational turns use `streamGenerateContent` with Server-Sent Events;
//! titles and suggestions use `generateContent`, optionally constrained by a
//! JSON response schema.
//!
//! # Configuration
//!
//! ```ignore
//! let config = GeminiConfig::new(api_key)
//!     .with_model("gemini-2.5-flash")
//!     .with_timeout(Duration::from_secs(120));
//!
//! let provider = GeminiProvider::new(config)?;
//! ```
//!
//! # Streaming
//!
//! Each SSE `data:` line carries a complete `GenerateContentResponse`.
//! Network chunks may split a line, so bytes are buffered until a newline
//! arrives before a line is decoded.

use async_trait::async_trait;
use futures::future;
use futures::stream::{self, StreamExt};
use reqwest::{Client, Response};
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;

use crate::ports::{
    AIError, AIProvider, ChunkStream, CompletionRequest, CompletionResponse, FinishReason,
    MessageRole, ProviderInfo, StreamChunk, TokenUsage,
};

/// Default model for conversational turns and background calls.
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";

/// Default API endpoint.
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Configuration for the Gemini provider.
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    api_key: Secret<String>,
    /// Model to use (e.g., "gemini-2.5-flash").
    pub model: String,
    /// Base URL for the API.
    pub base_url: String,
    /// Request timeout.
    pub timeout: Duration,
    /// Maximum retries on transient failures (non-streaming calls only).
    pub max_retries: u32,
}

impl GeminiConfig {
    /// Creates a new configuration with the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: Secret::new(api_key.into()),
            model: DEFAULT_GEMINI_MODEL.to_string(),
            base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            timeout: Duration::from_secs(120),
            max_retries: 3,
        }
    }

    /// Sets the model to use.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Sets the base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the maximum retry count.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    fn api_key(&self) -> &str {
        self.api_key.expose_secret()
    }
}

/// Gemini API provider implementation.
pub struct GeminiProvider {
    config: GeminiConfig,
    client: Client,
}

impl GeminiProvider {
    /// Creates a new Gemini provider with the given configuration.
    pub fn new(config: GeminiConfig) -> Result<Self, AIError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AIError::InvalidRequest(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    fn generate_url(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            self.config.model
        )
    }

    fn stream_url(&self) -> String {
        format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
            self.config.base_url.trim_end_matches('/'),
            self.config.model
        )
    }

    /// Converts our request to Gemini's format.
    fn to_gemini_request(request: &CompletionRequest) -> GeminiRequest {
        let contents = request
            .messages
            .iter()
            .map(|msg| GeminiContent {
                role: Some(
                    match msg.role {
                        MessageRole::User => "user",
                        MessageRole::Assistant => "model",
                    }
                    .to_string(),
                ),
                parts: vec![GeminiPart {
                    text: Some(msg.content.clone()),
                }],
            })
            .collect();

        let system_instruction = request.system_prompt.as_ref().map(|prompt| GeminiContent {
            role: None,
            parts: vec![GeminiPart {
                text: Some(prompt.clone()),
            }],
        });

        let generation_config = GenerationConfig {
            max_output_tokens: request.max_tokens,
            temperature: request.temperature,
            response_mime_type: request
                .response_schema
                .as_ref()
                .map(|_| "application/json".to_string()),
            response_schema: request.response_schema.clone(),
        };

        GeminiRequest {
            contents,
            system_instruction,
            generation_config: (!generation_config.is_empty()).then_some(generation_config),
        }
    }

    async fn post(&self, url: String, request: &CompletionRequest) -> Result<Response, AIError> {
        let body = Self::to_gemini_request(request);

        tracing::debug!(
            trace_id = %request.metadata.trace_id,
            model = %self.config.model,
            messages = body.contents.len(),
            "Sending Gemini request"
        );

        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", self.config.api_key())
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AIError::Timeout {
                        timeout_secs: self.config.timeout.as_secs() as u32,
                    }
                } else if e.is_connect() {
                    AIError::network(format!("Connection failed: {}", e))
                } else {
                    AIError::network(e.to_string())
                }
            })?;

        Self::handle_response_status(response).await
    }

    /// Parses the API response status and handles errors.
    async fn handle_response_status(response: Response) -> Result<Response, AIError> {
        let status = response.status();

        if status.is_success() {
            return Ok(response);
        }

        let error_body = response.text().await.unwrap_or_default();

        match status.as_u16() {
            401 | 403 => Err(AIError::AuthenticationFailed),
            400 if error_body.contains("API_KEY_INVALID") => Err(AIError::AuthenticationFailed),
            400 => Err(AIError::InvalidRequest(error_body)),
            429 => Err(AIError::rate_limited(Self::parse_retry_after(&error_body))),
            500..=599 => Err(AIError::unavailable(format!(
                "Server error {}: {}",
                status, error_body
            ))),
            _ => Err(AIError::network(format!(
                "Unexpected status {}: {}",
                status, error_body
            ))),
        }
    }

    /// Parses `retryDelay` (e.g. `"30s"`) from a quota error body.
    fn parse_retry_after(error_body: &str) -> u32 {
        serde_json::from_str::<serde_json::Value>(error_body)
            .ok()
            .and_then(|parsed| {
                parsed
                    .pointer("/error/details")?
                    .as_array()?
                    .iter()
                    .find_map(|detail| detail.get("retryDelay")?.as_str().map(str::to_string))
            })
            .and_then(|delay| delay.trim_end_matches('s').parse::<f64>().ok())
            .map(|secs| secs.ceil() as u32)
            .unwrap_or(30)
    }

    async fn parse_response(&self, response: Response) -> Result<CompletionResponse, AIError> {
        let gemini_response: GeminiResponse = response
            .json()
            .await
            .map_err(|e| AIError::parse(format!("Failed to parse response: {}", e)))?;

        if let Some(reason) = gemini_response.blocked_reason() {
            return Err(AIError::content_filtered(reason));
        }

        let finish_reason = gemini_response
            .finish_reason()
            .map(map_finish_reason)
            .unwrap_or(FinishReason::Stop);

        Ok(CompletionResponse {
            content: gemini_response.text(),
            usage: gemini_response.usage(),
            model: gemini_response
                .model_version
                .clone()
                .unwrap_or_else(|| self.config.model.clone()),
            finish_reason,
        })
    }

    async fn complete_once(&self, request: &CompletionRequest) -> Result<CompletionResponse, AIError> {
        let response = self.post(self.generate_url(), request).await?;
        self.parse_response(response).await
    }
}

#[async_trait]
impl AIProvider for GeminiProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, AIError> {
        let mut retry_count = 0;

        loop {
            match self.complete_once(&request).await {
                Ok(completion) => return Ok(completion),
                Err(err) if err.is_retryable() && retry_count < self.config.max_retries => {
                    tracing::warn!(
                        trace_id = %request.metadata.trace_id,
                        attempt = retry_count + 1,
                        error = %err,
                        "Retrying Gemini request"
                    );
                }
                Err(err) => return Err(err),
            }

            // Exponential backoff: 1s, 2s, 4s, ...
            sleep(Duration::from_secs(1 << retry_count)).await;
            retry_count += 1;
        }
    }

    async fn stream_complete(&self, request: CompletionRequest) -> Result<ChunkStream, AIError> {
        let response = self.post(self.stream_url(), &request).await?;

        let stream = response
            .bytes_stream()
            .scan(SseLineBuffer::default(), |buffer, chunk_result| {
                let items = match chunk_result {
                    Ok(bytes) => buffer
                        .push(&bytes)
                        .into_iter()
                        .flat_map(|data| parse_gemini_event(&data))
                        .collect(),
                    Err(e) => vec![Err(AIError::network(format!("Stream error: {}", e)))],
                };
                future::ready(Some(items))
            })
            .flat_map(stream::iter);

        Ok(Box::pin(stream))
    }

    fn provider_info(&self) -> ProviderInfo {
        ProviderInfo::new("gemini", &self.config.model).with_structured_output(true)
    }
}

/// Accumulates SSE bytes and yields the payload of each complete `data:` line.
#[derive(Debug, Default)]
struct SseLineBuffer {
    pending: Vec<u8>,
}

impl SseLineBuffer {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);

        let mut payloads = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\r', '\n']);
            if let Some(data) = line.strip_prefix("data:") {
                payloads.push(data.trim_start().to_string());
            }
        }
        payloads
    }
}

/// Parses one SSE payload into StreamChunks.
///
/// A payload carrying a finish reason yields its text (if any) followed
/// by a final chunk.
fn parse_gemini_event(data: &str) -> Vec<Result<StreamChunk, AIError>> {
    if data.is_empty() {
        return Vec::new();
    }

    let response = match serde_json::from_str::<GeminiResponse>(data) {
        Ok(response) => response,
        Err(e) => return vec![Err(AIError::parse(format!("Malformed stream event: {}", e)))],
    };

    if let Some(error) = response.error {
        return vec![Err(AIError::unavailable(
            error.message.unwrap_or_else(|| "Stream error".to_string()),
        ))];
    }
    if let Some(reason) = response.blocked_reason() {
        return vec![Err(AIError::content_filtered(reason))];
    }

    let mut results = Vec::new();
    let text = response.text();
    if !text.is_empty() {
        results.push(Ok(StreamChunk::content(text)));
    }
    if let Some(reason) = response.finish_reason() {
        let finish = map_finish_reason(reason);
        if finish == FinishReason::ContentFilter {
            results.push(Err(AIError::content_filtered(reason.to_string())));
        } else {
            results.push(Ok(StreamChunk::final_chunk(finish, response.usage())));
        }
    }
    results
}

fn map_finish_reason(reason: &str) -> FinishReason {
    match reason {
        "STOP" => FinishReason::Stop,
        "MAX_TOKENS" => FinishReason::Length,
        "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" | "SPII" => {
            FinishReason::ContentFilter
        }
        "FINISH_REASON_UNSPECIFIED" | "OTHER" => FinishReason::Error,
        _ => FinishReason::Stop,
    }
}

// ----- Gemini API Types -----

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_schema: Option<serde_json::Value>,
}

impl GenerationConfig {
    fn is_empty(&self) -> bool {
        self.max_output_tokens.is_none()
            && self.temperature.is_none()
            && self.response_mime_type.is_none()
            && self.response_schema.is_none()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    prompt_feedback: Option<PromptFeedback>,
    usage_metadata: Option<UsageMetadata>,
    model_version: Option<String>,
    error: Option<GeminiError>,
}

impl GeminiResponse {
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|part| part.text.as_deref())
                    .collect::<String>()
            })
            .unwrap_or_default()
    }

    fn finish_reason(&self) -> Option<&str> {
        self.candidates.first()?.finish_reason.as_deref()
    }

    fn blocked_reason(&self) -> Option<String> {
        self.prompt_feedback.as_ref()?.block_reason.clone()
    }

    fn usage(&self) -> TokenUsage {
        self.usage_metadata
            .as_ref()
            .map(|u| TokenUsage::new(u.prompt_token_count, u.candidates_token_count))
            .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::RequestMetadata;
    use serde_json::json;

    #[test]
    fn config_builder_works() {
        let config = GeminiConfig::new("test-key")
            .with_model("gemini-2.0-pro")
            .with_base_url("https://custom.api.com")
            .with_timeout(Duration::from_secs(30))
            .with_max_retries(5);

        assert_eq!(config.model, "gemini-2.0-pro");
        assert_eq!(config.base_url, "https://custom.api.com");
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.api_key(), "test-key");
    }

    #[test]
    fn config_debug_hides_key() {
        let config = GeminiConfig::new("super-secret");
        assert!(!format!("{:?}", config).contains("super-secret"));
    }

    #[test]
    fn urls_target_model_endpoints() {
        let provider =
            GeminiProvider::new(GeminiConfig::new("k").with_base_url("http://localhost:9/"))
                .unwrap();

        assert_eq!(
            provider.generate_url(),
            "http://localhost:9/v1beta/models/gemini-2.5-flash:generateContent"
        );
        assert_eq!(
            provider.stream_url(),
            "http://localhost:9/v1beta/models/gemini-2.5-flash:streamGenerateContent?alt=sse"
        );
    }

    #[test]
    fn request_maps_roles_and_system_instruction() {
        let request = CompletionRequest::new(RequestMetadata::detached("t"))
            .with_system_prompt("Be kind")
            .with_message(MessageRole::User, "Hi")
            .with_message(MessageRole::Assistant, "Hello");

        let body = serde_json::to_value(GeminiProvider::to_gemini_request(&request)).unwrap();

        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][1]["role"], "model");
        assert_eq!(body["contents"][1]["parts"][0]["text"], "Hello");
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "Be kind");
        assert!(body.get("generationConfig").is_none());
    }

    #[test]
    fn request_with_schema_asks_for_json() {
        let schema = json!({"type": "OBJECT"});
        let request = CompletionRequest::new(RequestMetadata::detached("t"))
            .with_message(MessageRole::User, "Suggest")
            .with_response_schema(schema.clone());

        let body = serde_json::to_value(GeminiProvider::to_gemini_request(&request)).unwrap();

        assert_eq!(
            body["generationConfig"]["responseMimeType"],
            "application/json"
        );
        assert_eq!(body["generationConfig"]["responseSchema"], schema);
    }

    #[test]
    fn parse_event_content() {
        let data = r#"{"candidates":[{"content":{"parts":[{"text":"Hello"}],"role":"model"}}]}"#;
        let chunks = parse_gemini_event(data);

        assert_eq!(chunks.len(), 1);
        let chunk = chunks[0].as_ref().unwrap();
        assert_eq!(chunk.delta, "Hello");
        assert!(!chunk.is_final());
    }

    #[test]
    fn parse_event_with_finish_reason_emits_text_then_final() {
        let data = r#"{"candidates":[{"content":{"parts":[{"text":"!"}]},"finishReason":"STOP"}],"usageMetadata":{"promptTokenCount":7,"candidatesTokenCount":3}}"#;
        let chunks = parse_gemini_event(data);

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].as_ref().unwrap().delta, "!");
        let last = chunks[1].as_ref().unwrap();
        assert!(last.is_final());
        assert_eq!(last.usage, Some(TokenUsage::new(7, 3)));
    }

    #[test]
    fn parse_event_safety_stop_is_error() {
        let data = r#"{"candidates":[{"finishReason":"SAFETY"}]}"#;
        let chunks = parse_gemini_event(data);

        assert!(matches!(chunks[0], Err(AIError::ContentFiltered { .. })));
    }

    #[test]
    fn parse_event_error_payload() {
        let chunks = parse_gemini_event(r#"{"error":{"code":503,"message":"overloaded"}}"#);

        assert!(matches!(chunks[0], Err(AIError::Unavailable { .. })));
    }

    #[test]
    fn parse_event_malformed_json() {
        let chunks = parse_gemini_event("{not json");
        assert!(matches!(chunks[0], Err(AIError::Parse(_))));
    }

    #[test]
    fn sse_buffer_joins_lines_split_across_chunks() {
        let mut buffer = SseLineBuffer::default();

        assert!(buffer.push(b"data: {\"a\":").is_empty());
        let payloads = buffer.push(b"1}\r\n\r\ndata: {\"b\":2}\n");

        assert_eq!(payloads, vec!["{\"a\":1}", "{\"b\":2}"]);
    }

    #[test]
    fn sse_buffer_keeps_multibyte_characters_intact() {
        let line = "data: {\"t\":\"😊\"}\n".as_bytes();
        let (head, tail) = line.split_at(12);
        let mut buffer = SseLineBuffer::default();

        assert!(buffer.push(head).is_empty());
        assert_eq!(buffer.push(tail), vec!["{\"t\":\"😊\"}"]);
    }

    #[test]
    fn parse_retry_after_reads_retry_delay() {
        let body = r#"{"error":{"details":[{"@type":"x"},{"retryDelay":"42s"}]}}"#;
        assert_eq!(GeminiProvider::parse_retry_after(body), 42);
    }

    #[test]
    fn parse_retry_after_default() {
        assert_eq!(GeminiProvider::parse_retry_after("not json"), 30);
    }

    #[test]
    fn provider_info_reports_structured_output() {
        let provider = GeminiProvider::new(GeminiConfig::new("k")).unwrap();
        let info = provider.provider_info();

        assert_eq!(info.name, "gemini");
        assert_eq!(info.model, DEFAULT_GEMINI_MODEL);
        assert!(info.supports_streaming);
        assert!(info.supports_structured_output);
    }
}
