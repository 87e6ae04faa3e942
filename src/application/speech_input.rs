//! SpeechInputController - microphone capture and recognition events.
//!
//! The controller owns the `recording` flag. It is set when capture starts
//! and cleared only when the platform reports an error or the end of capture.

use std::sync::Arc;

use super::error::ChatError;
use crate::ports::{RecognitionEvent, SpeechRecognizer};

/// What a recognition event asks the session to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionOutcome {
    /// Replace the input field with this transcript.
    Transcript(String),
    /// Show this error; recording has stopped.
    Failed(String),
    /// Recording has stopped.
    Ended,
}

/// Result of pressing the microphone button.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleOutcome {
    Started,
    Stopping,
}

pub struct SpeechInputController {
    recognizer: Option<Arc<dyn SpeechRecognizer>>,
    recording: bool,
}

impl SpeechInputController {
    pub fn new(recognizer: Option<Arc<dyn SpeechRecognizer>>) -> Self {
        Self {
            recognizer,
            recording: false,
        }
    }

    pub fn is_available(&self) -> bool {
        self.recognizer.is_some()
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// Starts capture, or asks a running capture to stop.
    pub fn toggle(&mut self) -> Result<ToggleOutcome, ChatError> {
        let recognizer = self
            .recognizer
            .as_ref()
            .ok_or(ChatError::CapabilityUnavailable("speech recognition"))?;

        if self.recording {
            recognizer.stop();
            return Ok(ToggleOutcome::Stopping);
        }

        if let Err(e) = recognizer.start() {
            tracing::warn!(error = %e, "Speech recognition refused to start");
            return Err(ChatError::CapabilityUnavailable("speech recognition"));
        }
        self.recording = true;
        Ok(ToggleOutcome::Started)
    }

    /// Stops capture if it is running.
    pub fn stop(&mut self) -> bool {
        match &self.recognizer {
            Some(recognizer) if self.recording => {
                recognizer.stop();
                true
            }
            _ => false,
        }
    }

    /// Applies a platform event to the recording flag.
    pub fn handle_event(&mut self, event: RecognitionEvent) -> RecognitionOutcome {
        match event {
            RecognitionEvent::Transcript(text) => RecognitionOutcome::Transcript(text),
            RecognitionEvent::Error(code) => {
                self.recording = false;
                RecognitionOutcome::Failed(format!("Speech recognition error: {}", code))
            }
            RecognitionEvent::Ended => {
                self.recording = false;
                RecognitionOutcome::Ended
            }
        }
    }
}
