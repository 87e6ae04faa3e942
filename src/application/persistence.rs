//! PersistenceGateway - typed access to the client's persisted state.
//!
//! Three blobs are kept, each read and written whole:
//!
//! | Key                       | Contents                        |
//! |---------------------------|---------------------------------|
//! | `companion.user`          | the signed-in [`User`]          |
//! | `companion.settings`      | [`SessionSettings`]             |
//! | `companion.conversations` | the conversation collection     |
//!
//! Loads never fail: missing or corrupt blobs fall back to defaults and are
//! logged. Writes return errors so callers can decide; the orchestrator logs
//! and moves on.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::domain::conversation::Conversation;
use crate::domain::settings::SessionSettings;
use crate::domain::user::User;
use crate::ports::{BlobStore, BlobStoreError};

pub const USER_KEY: &str = "companion.user";
pub const SETTINGS_KEY: &str = "companion.settings";
pub const CONVERSATIONS_KEY: &str = "companion.conversations";

/// Reads and writes client state through a [`BlobStore`].
#[derive(Clone)]
pub struct PersistenceGateway {
    store: Arc<dyn BlobStore>,
}

impl PersistenceGateway {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self { store }
    }

    /// The persisted user, or `None` if absent or unreadable.
    pub async fn load_user(&self) -> Option<User> {
        self.load(USER_KEY).await
    }

    pub async fn save_user(&self, user: &User) -> Result<(), BlobStoreError> {
        self.save(USER_KEY, user).await
    }

    pub async fn remove_user(&self) -> Result<(), BlobStoreError> {
        self.store.remove(USER_KEY).await
    }

    /// Persisted settings, falling back to defaults field by field.
    pub async fn load_settings(&self) -> SessionSettings {
        self.load(SETTINGS_KEY).await.unwrap_or_default()
    }

    pub async fn save_settings(&self, settings: &SessionSettings) -> Result<(), BlobStoreError> {
        self.save(SETTINGS_KEY, settings).await
    }

    /// Persisted conversations, newest first. Empty if absent or unreadable.
    pub async fn load_conversations(&self) -> Vec<Conversation> {
        self.load(CONVERSATIONS_KEY).await.unwrap_or_default()
    }

    pub async fn save_conversations(
        &self,
        conversations: &[Conversation],
    ) -> Result<(), BlobStoreError> {
        self.save(CONVERSATIONS_KEY, conversations).await
    }

    pub async fn remove_conversations(&self) -> Result<(), BlobStoreError> {
        self.store.remove(CONVERSATIONS_KEY).await
    }

    async fn load<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.store.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(key, error = %e, "Failed to read persisted state");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key, error = %e, "Discarding corrupt persisted state");
                None
            }
        }
    }

    async fn save<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), BlobStoreError> {
        let json = serde_json::to_string(value)
            .map_err(|e| BlobStoreError::SerializationFailed(e.to_string()))?;
        self.store.put(key, &json).await
    }
}
