//! Recording Synthesizer - a SpeechSynthesizer that writes down what it would say.
//!
//! Used by tests to observe vocalization, and by the terminal driver to log
//! spoken replies.

use std::sync::{Arc, Mutex};

use crate::domain::settings::Voice;
use crate::ports::{SpeechError, SpeechSynthesizer, Utterance};

#[derive(Debug, Default)]
struct Recording {
    utterances: Vec<Utterance>,
    cancels: usize,
    voices: Vec<Voice>,
    fail_next: bool,
}

/// Synthesizer that records utterances and cancellations.
#[derive(Debug, Clone, Default)]
pub struct RecordingSynthesizer {
    inner: Arc<Mutex<Recording>>,
    log_utterances: bool,
}

impl RecordingSynthesizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer these voices from `voices()`.
    pub fn with_voices(self, voices: Vec<Voice>) -> Self {
        self.set_voices(voices);
        self
    }

    /// Emit each utterance as an `info` log line.
    pub fn logging(mut self) -> Self {
        self.log_utterances = true;
        self
    }

    /// Replace the offered voices, as a platform does when its list loads late.
    pub fn set_voices(&self, voices: Vec<Voice>) {
        self.lock().voices = voices;
    }

    /// Make the next `speak` call fail.
    pub fn fail_next(&self) {
        self.lock().fail_next = true;
    }

    pub fn utterances(&self) -> Vec<Utterance> {
        self.lock().utterances.clone()
    }

    pub fn cancel_count(&self) -> usize {
        self.lock().cancels
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Recording> {
        // A panic while holding this lock leaves plain data behind.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl SpeechSynthesizer for RecordingSynthesizer {
    fn speak(&self, utterance: Utterance) -> Result<(), SpeechError> {
        let mut recording = self.lock();
        if std::mem::take(&mut recording.fail_next) {
            return Err(SpeechError::Failed("synthesis-failed".to_string()));
        }
        if self.log_utterances {
            tracing::info!(
                voice = utterance.voice_id.as_deref().unwrap_or("default"),
                rate = utterance.rate.value(),
                text = %utterance.text,
                "Speaking"
            );
        }
        recording.utterances.push(utterance);
        Ok(())
    }

    fn cancel(&self) {
        self.lock().cancels += 1;
    }

    fn voices(&self) -> Vec<Voice> {
        self.lock().voices.clone()
    }
}
