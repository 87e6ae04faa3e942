//! Message entity for conversations.
//!
//! A message is a single utterance by either the user or the assistant.
//! Its text is only ever empty while it serves as the streaming placeholder
//! at the tail of a conversation.

use serde::{Deserialize, Serialize};

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Author {
    /// The human at the keyboard or microphone.
    User,
    /// The hosted assistant.
    Assistant,
}

/// A single message within a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Who wrote this message.
    pub author: Author,
    /// Message body. Empty only for an in-flight placeholder.
    pub text: String,
}

impl ChatMessage {
    /// Creates a message authored by the user.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            author: Author::User,
            text: text.into(),
        }
    }

    /// Creates a message authored by the assistant.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            author: Author::Assistant,
            text: text.into(),
        }
    }

    /// Creates the empty assistant message that streaming fills in.
    pub fn placeholder() -> Self {
        Self::assistant(String::new())
    }

    /// Returns true if this message was written by the assistant.
    pub fn is_from_assistant(&self) -> bool {
        self.author == Author::Assistant
    }

    /// Returns true if the message carries no text yet.
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}
