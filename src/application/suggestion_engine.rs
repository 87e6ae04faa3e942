//! SuggestionEngine - best-effort titles and follow-up chips.
//!
//! Both calls are non-streaming and may fail freely; callers keep the
//! previous title or fall back to [`DEFAULT_SUGGESTIONS`].

use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;

use super::error::ChatError;
use crate::domain::foundation::ConversationId;
use crate::ports::{AIProvider, CompletionRequest, MessageRole, RequestMetadata};

/// Chips shown before the first reply and after any failure.
pub const DEFAULT_SUGGESTIONS: [&str; 3] = [
    "💬 Tell me something interesting",
    "🌱 Help me plan a better day",
    "😊 How can I feel more relaxed?",
];

/// Most chips ever shown at once.
pub const MAX_SUGGESTIONS: usize = 3;

pub fn default_suggestions() -> Vec<String> {
    DEFAULT_SUGGESTIONS.iter().map(|s| s.to_string()).collect()
}

#[derive(Debug, Deserialize)]
struct SuggestionPayload {
    suggestions: Vec<String>,
}

#[derive(Clone)]
pub struct SuggestionEngine {
    provider: Arc<dyn AIProvider>,
}

impl SuggestionEngine {
    pub fn new(provider: Arc<dyn AIProvider>) -> Self {
        Self { provider }
    }

    /// Asks for a 3 to 5 word title for a conversation opening with `first_prompt`.
    pub async fn derive_title(
        &self,
        conversation_id: ConversationId,
        first_prompt: &str,
    ) -> Result<String, ChatError> {
        let request = CompletionRequest::new(RequestMetadata::for_conversation(
            conversation_id,
            format!("title-{}", conversation_id),
        ))
        .with_message(MessageRole::User, title_prompt(first_prompt));

        let response = self
            .provider
            .complete(request)
            .await
            .map_err(|e| ChatError::Background(e.to_string()))?;

        clean_title(&response.content)
            .ok_or_else(|| ChatError::Background("model returned an empty title".to_string()))
    }

    /// Asks for up to three follow-up prompts based on the latest reply.
    pub async fn derive_suggestions(
        &self,
        conversation_id: ConversationId,
        last_reply: &str,
    ) -> Result<Vec<String>, ChatError> {
        let request = CompletionRequest::new(RequestMetadata::for_conversation(
            conversation_id,
            format!("suggestions-{}", conversation_id),
        ))
        .with_message(MessageRole::User, suggestions_prompt(last_reply))
        .with_response_schema(suggestions_schema());

        let response = self
            .provider
            .complete(request)
            .await
            .map_err(|e| ChatError::Background(e.to_string()))?;

        parse_suggestions(&response.content)
    }
}

pub fn title_prompt(first_prompt: &str) -> String {
    format!(
        "Generate a very short, concise title (3-5 words) for a conversation that starts with this message: \"{}\"",
        first_prompt
    )
}

pub fn suggestions_prompt(last_reply: &str) -> String {
    format!(
        "Based on this statement: \"{}\", generate 3 short, relevant, and engaging follow-up suggestions for a user to continue the conversation. Include an emoji in each suggestion.",
        last_reply
    )
}

/// JSON schema for `{"suggestions": [string]}`.
pub fn suggestions_schema() -> serde_json::Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "suggestions": {
                "type": "ARRAY",
                "items": { "type": "STRING" }
            }
        },
        "required": ["suggestions"]
    })
}

fn clean_title(raw: &str) -> Option<String> {
    let title = raw.trim().replace('"', "");
    let title = title.trim();
    (!title.is_empty()).then(|| title.to_string())
}

fn parse_suggestions(content: &str) -> Result<Vec<String>, ChatError> {
    let payload: SuggestionPayload = serde_json::from_str(content.trim())
        .map_err(|e| ChatError::Background(format!("malformed suggestions: {}", e)))?;

    let suggestions: Vec<String> = payload
        .suggestions
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .take(MAX_SUGGESTIONS)
        .collect();

    if suggestions.is_empty() {
        return Err(ChatError::Background("no suggestions returned".to_string()));
    }
    Ok(suggestions)
}
