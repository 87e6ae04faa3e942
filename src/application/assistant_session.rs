//! AssistantSession - the live binding between one conversation and the model.
//!
//! A session is built from a conversation's history and is never patched
//! to follow a different conversation; the orchestrator builds a new one
//! whenever the active conversation changes.

use std::pin::Pin;
use std::sync::Arc;

use futures::{Stream, StreamExt};

use super::error::ChatError;
use crate::domain::conversation::{Author, Conversation};
use crate::domain::foundation::ConversationId;
use crate::domain::user::Mood;
use crate::ports::{AIProvider, CompletionRequest, Message, MessageRole, RequestMetadata};

/// Lazy, finite sequence of reply text fragments.
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<String, ChatError>> + Send>>;

/// Remote-visible prefix carrying the detected mood.
pub fn mood_prefix(mood: Mood) -> String {
    format!("[System Note: The user's current detected mood is {}.] ", mood)
}

/// A conversation's history bound to the assistant provider.
#[derive(Clone)]
pub struct AssistantSession {
    conversation_id: ConversationId,
    provider: Arc<dyn AIProvider>,
    system_prompt: String,
    history: Vec<Message>,
}

impl AssistantSession {
    /// Binds `conversation` to `provider`.
    ///
    /// The leading greeting and empty placeholders are left out of the
    /// remote history.
    pub fn bind(
        provider: Arc<dyn AIProvider>,
        system_prompt: impl Into<String>,
        conversation: &Conversation,
    ) -> Self {
        let history = conversation
            .remote_history()
            .map(|m| match m.author {
                Author::User => Message::user(&m.text),
                Author::Assistant => Message::assistant(&m.text),
            })
            .collect();

        Self {
            conversation_id: conversation.id(),
            provider,
            system_prompt: system_prompt.into(),
            history,
        }
    }

    pub fn conversation_id(&self) -> ConversationId {
        self.conversation_id
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    /// Builds the request for one turn.
    pub fn request_for(&self, prompt: &str, mood: Option<Mood>) -> CompletionRequest {
        let text = match mood {
            Some(mood) => format!("{}{}", mood_prefix(mood), prompt),
            None => prompt.to_string(),
        };

        let turn = self
            .history
            .iter()
            .filter(|m| m.role == MessageRole::User)
            .count()
            + 1;
        let trace_id = format!("turn-{}-{}", self.conversation_id, turn);
        let mut request =
            CompletionRequest::new(RequestMetadata::for_conversation(self.conversation_id, trace_id))
                .with_system_prompt(&self.system_prompt);
        for message in &self.history {
            request = request.with_message(message.role, &message.content);
        }
        request.with_message(MessageRole::User, text)
    }

    /// Starts streaming the reply to `prompt`.
    ///
    /// Fails with [`ChatError::Stream`] if the provider rejects the request;
    /// later transport failures arrive as stream items.
    pub async fn send_stream(
        &self,
        prompt: &str,
        mood: Option<Mood>,
    ) -> Result<DeltaStream, ChatError> {
        let request = self.request_for(prompt, mood);
        let chunks = self.provider.stream_complete(request).await?;

        let deltas = chunks.filter_map(|chunk| async move {
            match chunk {
                Ok(chunk) if chunk.delta.is_empty() => None,
                Ok(chunk) => Some(Ok(chunk.delta)),
                Err(e) => Some(Err(ChatError::from(e))),
            }
        });
        Ok(Box::pin(deltas))
    }
}

impl std::fmt::Debug for AssistantSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssistantSession")
            .field("conversation_id", &self.conversation_id)
            .field("provider", &self.provider.provider_info().name)
            .field("history_len", &self.history.len())
            .finish()
    }
}
