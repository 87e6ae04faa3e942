//! SpeechOutputController - vocalizes finished replies.
//!
//! Two states, `Idle` and `Speaking`. The orchestrator calls
//! [`SpeechOutputController::speak_reply`] once per successfully completed
//! turn; every other path only ever cancels.

use std::sync::Arc;

use crate::domain::conversation::Conversation;
use crate::domain::settings::{choose_voice, SessionSettings, Voice};
use crate::ports::{SpeechError, SpeechSynthesizer, Utterance};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechState {
    Idle,
    Speaking,
}

pub struct SpeechOutputController {
    synthesizer: Option<Arc<dyn SpeechSynthesizer>>,
    enabled: bool,
    state: SpeechState,
}

impl SpeechOutputController {
    pub fn new(synthesizer: Option<Arc<dyn SpeechSynthesizer>>) -> Self {
        Self {
            synthesizer,
            enabled: true,
            state: SpeechState::Idle,
        }
    }

    pub fn is_available(&self) -> bool {
        self.synthesizer.is_some()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn state(&self) -> SpeechState {
        self.state
    }

    /// Voices the synthesizer currently offers.
    pub fn voices(&self) -> Vec<Voice> {
        self.synthesizer
            .as_ref()
            .map(|s| s.voices())
            .unwrap_or_default()
    }

    /// Turns vocalization on or off. Turning it off silences any utterance.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.cancel();
        }
    }

    /// Speaks the last message of `conversation` if it is a non-empty reply.
    ///
    /// Returns `Ok(true)` when an utterance was started. Any utterance
    /// already playing is cancelled first.
    pub fn speak_reply(
        &mut self,
        conversation: Option<&Conversation>,
        settings: &SessionSettings,
        voices: &[Voice],
    ) -> Result<bool, SpeechError> {
        if !self.enabled {
            return Ok(false);
        }
        let Some(synthesizer) = self.synthesizer.clone() else {
            return Ok(false);
        };
        let Some(reply) = conversation
            .and_then(Conversation::last_message)
            .filter(|m| m.is_from_assistant() && !m.text.trim().is_empty())
        else {
            return Ok(false);
        };

        self.cancel();

        let utterance = Utterance {
            text: reply.text.clone(),
            voice_id: choose_voice(voices, settings.voice_id.as_deref()).map(|v| v.id.clone()),
            rate: settings.rate,
        };
        synthesizer.speak(utterance)?;
        self.state = SpeechState::Speaking;
        tracing::debug!("Speech output started");
        Ok(true)
    }

    /// Stops any utterance in flight.
    pub fn cancel(&mut self) {
        if let Some(synthesizer) = &self.synthesizer {
            synthesizer.cancel();
        }
        self.state = SpeechState::Idle;
    }

    /// The platform reports the utterance ended on its own.
    pub fn on_utterance_finished(&mut self) {
        self.state = SpeechState::Idle;
    }
}
