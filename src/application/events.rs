//! UI projection of session state changes.
//!
//! The orchestrator emits one event per visible change, in the order the
//! changes were made. A renderer can rebuild its view from these alone or
//! treat them as invalidation hints and read the orchestrator's accessors.

use crate::domain::foundation::ConversationId;

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Conversations were created, deleted, loaded or cleared, or the active one changed.
    ConversationsChanged { active: Option<ConversationId> },
    /// A user prompt and its empty reply placeholder were appended.
    TurnStarted {
        conversation_id: ConversationId,
        prompt: String,
    },
    /// The reply placeholder now holds `text`.
    ReplyUpdated {
        conversation_id: ConversationId,
        text: String,
    },
    /// The reply finished streaming.
    TurnCompleted {
        conversation_id: ConversationId,
        text: String,
    },
    /// The last prompt and reply were removed after a failure.
    TurnRolledBack { conversation_id: ConversationId },
    TitleChanged {
        conversation_id: ConversationId,
        title: String,
    },
    SuggestionsChanged(Vec<String>),
    SendingChanged(bool),
    ErrorChanged(Option<String>),
    InputChanged(String),
    RecordingChanged(bool),
    SpeakingChanged(bool),
    /// The signed-in user changed (login, logout, avatar update).
    UserChanged,
    SettingsChanged,
}
