//! Application configuration module
//!
//! This module provides type-safe configuration loading from environment variables
//! using the `config` and `dotenvy` crates. Configuration is loaded with the
//! `COMPANION` prefix and nested values use double underscores as separators.
//!
//! # Example
//!
//! ```no_run
//! use companion_chat::config::AppConfig;
//!
//! let config = AppConfig::load().expect("Failed to load configuration");
//! config.validate().expect("Invalid configuration");
//!
//! println!("Storing data in {}", config.storage.data_dir.display());
//! ```

mod ai;
mod chat;
mod error;
mod logging;
mod storage;

pub use ai::{AiConfig, AiProvider, DEFAULT_SYSTEM_PROMPT};
pub use chat::ChatConfig;
pub use error::{ConfigError, ValidationError};
pub use logging::LoggingConfig;
pub use storage::StorageConfig;

use serde::Deserialize;

/// Root application configuration
///
/// Every section has defaults, so an empty environment yields a usable
/// configuration apart from the Gemini API key.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    /// AI provider configuration (Gemini or mock)
    #[serde(default)]
    pub ai: AiConfig,

    /// Persistence location
    #[serde(default)]
    pub storage: StorageConfig,

    /// Conversation tunables
    #[serde(default)]
    pub chat: ChatConfig,

    /// Log output format
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    ///
    /// This function:
    /// 1. Loads `.env` file if present (for development)
    /// 2. Reads environment variables with `COMPANION` prefix
    /// 3. Uses `__` (double underscore) to separate nested values
    /// 4. Deserializes into typed configuration structs
    ///
    /// # Environment Variable Format
    ///
    /// - `COMPANION__AI__GEMINI_API_KEY=...` -> `ai.gemini_api_key = ...`
    /// - `COMPANION__STORAGE__DATA_DIR=/tmp/x` -> `storage.data_dir = /tmp/x`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if values cannot be parsed into expected types.
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if present (development)
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .prefix("COMPANION")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Validate all configuration values
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` if any configuration value is invalid.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.ai.validate()?;
        self.storage.validate()?;
        self.chat.validate()?;
        Ok(())
    }
}
