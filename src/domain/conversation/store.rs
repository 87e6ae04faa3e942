//! ConversationStore - the ordered conversation collection plus the active pointer.
//!
//! Pure data and mutation, no I/O. The collection is kept newest-first:
//! creation prepends, deletion never reorders the survivors.

use super::{Conversation, DEFAULT_GREETING};
use crate::domain::foundation::ConversationId;

/// Ordered collection of conversations with a single active pointer.
#[derive(Debug, Clone)]
pub struct ConversationStore {
    conversations: Vec<Conversation>,
    active: Option<ConversationId>,
    greeting: String,
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new(DEFAULT_GREETING)
    }
}

impl ConversationStore {
    /// Creates an empty store whose new conversations open with `greeting`.
    pub fn new(greeting: impl Into<String>) -> Self {
        Self {
            conversations: Vec::new(),
            active: None,
            greeting: greeting.into(),
        }
    }

    /// Creates a conversation seeded with the greeting, prepends it and makes it active.
    pub fn create_conversation(&mut self) -> &Conversation {
        let conversation = Conversation::new(self.greeting.clone());
        self.active = Some(conversation.id());
        self.conversations.insert(0, conversation);
        &self.conversations[0]
    }

    /// Applies `transform` to the conversation with `id`.
    ///
    /// Returns false if no such conversation exists; other entries and their
    /// order are never touched.
    pub fn update<F>(&mut self, id: ConversationId, transform: F) -> bool
    where
        F: FnOnce(&mut Conversation),
    {
        match self.conversations.iter_mut().find(|c| c.id() == id) {
            Some(conversation) => {
                transform(conversation);
                true
            }
            None => false,
        }
    }

    /// Removes the conversation with `id`.
    ///
    /// If it was active, the conversation immediately preceding it becomes
    /// active, else the first remaining one, else a fresh conversation is
    /// created. Returns false if nothing was removed.
    pub fn delete(&mut self, id: ConversationId) -> bool {
        let Some(index) = self.conversations.iter().position(|c| c.id() == id) else {
            return false;
        };
        self.conversations.remove(index);

        if self.active == Some(id) {
            if self.conversations.is_empty() {
                self.create_conversation();
            } else {
                let next = index.saturating_sub(1);
                self.active = Some(self.conversations[next].id());
            }
        }
        true
    }

    /// Makes `id` the active conversation. Returns false if it does not exist.
    pub fn select(&mut self, id: ConversationId) -> bool {
        if self.contains(id) {
            self.active = Some(id);
            true
        } else {
            false
        }
    }

    /// Replaces the whole collection, activating its first entry.
    pub fn replace_all(&mut self, conversations: Vec<Conversation>) {
        self.active = conversations.first().map(Conversation::id);
        self.conversations = conversations;
    }

    /// Drops every conversation and clears the active pointer.
    pub fn clear(&mut self) {
        self.conversations.clear();
        self.active = None;
    }

    pub fn active_id(&self) -> Option<ConversationId> {
        self.active
    }

    /// Returns the active conversation, if any.
    pub fn active(&self) -> Option<&Conversation> {
        self.active.and_then(|id| self.get(id))
    }

    pub fn get(&self, id: ConversationId) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id() == id)
    }

    pub fn contains(&self, id: ConversationId) -> bool {
        self.get(id).is_some()
    }

    /// Conversations, newest first.
    pub fn iter(&self) -> impl Iterator<Item = &Conversation> {
        self.conversations.iter()
    }

    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }
}
