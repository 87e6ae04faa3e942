//! Session-level error taxonomy.
//!
//! Port errors are folded into these variants at the orchestrator boundary.
//! Each variant has a fixed recovery policy; see [`ChatError::user_message`] for what the user sees.

use thiserror::Error;

use crate::ports::AIError;

/// Shown when a reply stream fails before or during streaming.
pub const STREAM_FAILURE_MESSAGE: &str =
    "An error occurred while communicating with the AI. Please try again.";

/// Shown when a send happens before the assistant binding exists.
pub const SESSION_NOT_READY_MESSAGE: &str = "Chat is not initialized.";

/// Shown when no assistant backend could be configured.
pub const MISSING_API_KEY_MESSAGE: &str =
    "API key is missing. Set COMPANION__AI__GEMINI_API_KEY and restart.";

/// Errors raised by the session core.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    /// Fatal setup problem such as a missing credential. Blocks sends.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// No assistant binding for the active conversation yet.
    #[error("assistant session is not ready")]
    SessionNotReady,

    /// The reply stream failed before or during streaming.
    #[error("stream failed: {0}")]
    Stream(String),

    /// A title or suggestion call failed. Never shown to the user.
    #[error("background call failed: {0}")]
    Background(String),

    /// A speech capability is absent or refused to start.
    #[error("{0} is not available")]
    CapabilityUnavailable(&'static str),
}

impl ChatError {
    /// Text to surface in the error banner.
    pub fn user_message(&self) -> String {
        match self {
            ChatError::Configuration(detail) => detail.clone(),
            ChatError::SessionNotReady => SESSION_NOT_READY_MESSAGE.to_string(),
            ChatError::Stream(_) => STREAM_FAILURE_MESSAGE.to_string(),
            ChatError::Background(detail) => detail.clone(),
            ChatError::CapabilityUnavailable(feature) => {
                format!("Sorry, {} is not supported here.", feature)
            }
        }
    }

    /// True for errors the user can recover from by resending.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ChatError::SessionNotReady | ChatError::Stream(_))
    }
}

impl From<AIError> for ChatError {
    fn from(err: AIError) -> Self {
        ChatError::Stream(err.to_string())
    }
}
