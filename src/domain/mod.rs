//! Domain layer containing business logic and domain types.
//!
//! # Module Organization
//!
//! - `foundation` - Shared domain primitives (IDs, timestamps, errors)
//! - `conversation` - Conversations, messages and the conversation store
//! - `settings` - Persisted voice/rate/sound preferences and voice selection
//! - `user` - The signed-in user record and mood hint

pub mod conversation;
pub mod foundation;
pub mod settings;
pub mod user;
