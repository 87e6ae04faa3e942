//! Conversation entity - a titled, ordered thread of messages.

use serde::{Deserialize, Serialize};

use super::{Author, ChatMessage};
use crate::domain::foundation::{ConversationId, Timestamp};

/// Title every conversation starts with.
pub const NEW_CHAT_TITLE: &str = "New Chat";

/// Greeting used when no greeting is configured.
pub const DEFAULT_GREETING: &str =
    "Hello! I'm your personal companion. How can I help you today? 😊";

/// Conversation entity.
///
/// # Invariants
///
/// - `id` never changes after construction
/// - a non-empty conversation starts with the assistant greeting
/// - only the last message may have empty text, and only mid-stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    id: ConversationId,
    title: String,
    messages: Vec<ChatMessage>,
    #[serde(default)]
    created_at: Timestamp,
    #[serde(default)]
    updated_at: Timestamp,
}

impl Conversation {
    /// Creates a conversation seeded with a single assistant greeting.
    pub fn new(greeting: impl Into<String>) -> Self {
        let now = Timestamp::now();
        Self {
            id: ConversationId::new(),
            title: NEW_CHAT_TITLE.to_string(),
            messages: vec![ChatMessage::assistant(greeting)],
            created_at: now,
            updated_at: now,
        }
    }

    pub fn id(&self) -> ConversationId {
        self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    pub fn updated_at(&self) -> Timestamp {
        self.updated_at
    }

    /// Returns the most recent message, if any.
    pub fn last_message(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    /// True when only the greeting has been exchanged so far.
    pub fn is_awaiting_first_exchange(&self) -> bool {
        self.messages.len() == 1
    }

    /// Replaces the title.
    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
        self.touch();
    }

    /// Appends the user's prompt and an empty assistant placeholder together.
    ///
    /// This is the only operation that adds two messages at once, which is
    /// what lets [`Conversation::rollback_turn`] remove exactly this pair.
    pub fn begin_turn(&mut self, prompt: impl Into<String>) {
        self.messages.push(ChatMessage::user(prompt));
        self.messages.push(ChatMessage::placeholder());
        self.touch();
    }

    /// Overwrites the text of the trailing assistant message.
    ///
    /// Returns false (and changes nothing) if the last message is not
    /// authored by the assistant.
    pub fn overwrite_reply(&mut self, text: impl Into<String>) -> bool {
        match self.messages.last_mut() {
            Some(last) if last.author == Author::Assistant => {
                last.text = text.into();
                self.touch();
                true
            }
            _ => false,
        }
    }

    /// Removes the last two messages (the user prompt and its reply).
    pub fn rollback_turn(&mut self) {
        let keep = self.messages.len().saturating_sub(2);
        self.messages.truncate(keep);
        self.touch();
    }

    /// Messages that make up the remote history.
    ///
    /// Skips the leading greeting and any empty placeholder.
    pub fn remote_history(&self) -> impl Iterator<Item = &ChatMessage> {
        let skip = match self.messages.first() {
            Some(first) if first.is_from_assistant() => 1,
            _ => 0,
        };
        self.messages.iter().skip(skip).filter(|m| !m.is_empty())
    }

    fn touch(&mut self) {
        self.updated_at = Timestamp::now();
    }
}
