//! Chat behaviour configuration

use serde::Deserialize;

use super::error::ValidationError;
use crate::domain::conversation::DEFAULT_GREETING;

/// Tunables for conversation handling
#[derive(Debug, Clone, Deserialize)]
pub struct ChatConfig {
    /// Characters of the first prompt used as the provisional title
    #[serde(default = "default_title_prefix_len")]
    pub title_prefix_len: usize,

    /// Assistant greeting that opens every new conversation
    #[serde(default = "default_greeting")]
    pub greeting: String,
}

impl ChatConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.title_prefix_len == 0 {
            return Err(ValidationError::InvalidTitlePrefix);
        }
        if self.greeting.trim().is_empty() {
            return Err(ValidationError::EmptyGreeting);
        }
        Ok(())
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            title_prefix_len: default_title_prefix_len(),
            greeting: default_greeting(),
        }
    }
}

fn default_title_prefix_len() -> usize {
    40
}

fn default_greeting() -> String {
    DEFAULT_GREETING.to_string()
}
