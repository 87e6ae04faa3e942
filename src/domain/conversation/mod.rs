//! Conversation domain module.
//!
//! Conversations, their messages, and the ordered store that tracks
//! which conversation is active.

mod conversation;
mod message;
mod store;

pub use conversation::{Conversation, DEFAULT_GREETING, NEW_CHAT_TITLE};
pub use message::{Author, ChatMessage};
pub use store::ConversationStore;
