//! Application layer - the chat session and its collaborators.
//!
//! [`SessionOrchestrator`] owns all session state and drives every
//! transition. The other modules are the pieces it coordinates:
//!
//! - `assistant_session` - one conversation bound to the model
//! - `suggestion_engine` - best-effort titles and follow-up chips
//! - `speech_output` / `speech_input` - vocalized replies and voice capture
//! - `persistence` - typed access to the persisted blobs
//! - `events` - change notifications for a renderer

pub mod assistant_session;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod persistence;
pub mod speech_input;
pub mod speech_output;
pub mod suggestion_engine;

pub use assistant_session::{mood_prefix, AssistantSession, DeltaStream};
pub use error::{
    ChatError, MISSING_API_KEY_MESSAGE, SESSION_NOT_READY_MESSAGE, STREAM_FAILURE_MESSAGE,
};
pub use events::SessionEvent;
pub use orchestrator::{SendOutcome, SessionOrchestrator, SessionOrchestratorBuilder};
pub use persistence::{PersistenceGateway, CONVERSATIONS_KEY, SETTINGS_KEY, USER_KEY};
pub use speech_input::{RecognitionOutcome, SpeechInputController, ToggleOutcome};
pub use speech_output::{SpeechOutputController, SpeechState};
pub use suggestion_engine::{default_suggestions, SuggestionEngine, DEFAULT_SUGGESTIONS};
