//! Speech Ports - Interfaces for the platform's speech capabilities.
//!
//! Both capabilities are optional. The session core holds them as
//! `Option<Arc<dyn ...>>` and degrades the affected feature when absent.
//!
//! Recognition results are not returned from these calls; the platform
//! delivers them later as [`RecognitionEvent`]s, which the caller feeds
//! into the orchestrator.

use crate::domain::settings::{SpeechRate, Voice};

/// Errors raised by speech capabilities.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SpeechError {
    #[error("speech capability unavailable")]
    Unavailable,

    #[error("speech capability failed: {0}")]
    Failed(String),
}

/// One request to vocalize text.
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub text: String,
    /// Voice to use; `None` lets the platform pick.
    pub voice_id: Option<String>,
    pub rate: SpeechRate,
}

/// Port for text-to-speech output.
pub trait SpeechSynthesizer: Send + Sync {
    /// Start vocalizing an utterance. Returns once playback has been queued.
    fn speak(&self, utterance: Utterance) -> Result<(), SpeechError>;

    /// Stop any in-flight or queued utterance.
    fn cancel(&self);

    /// Voices currently on offer. The list may change after startup.
    fn voices(&self) -> Vec<Voice>;
}

/// Events emitted by a running speech recognizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionEvent {
    /// The full transcript so far (interim results included).
    Transcript(String),
    /// Recognition failed with a platform error code.
    Error(String),
    /// Capture ended, either on request or by the platform.
    Ended,
}

/// Port for speech-to-text input.
pub trait SpeechRecognizer: Send + Sync {
    /// Begin capturing speech.
    fn start(&self) -> Result<(), SpeechError>;

    /// Stop capturing. The platform follows up with [`RecognitionEvent::Ended`].
    fn stop(&self);
}
