//! Scripted Recognizer - a SpeechRecognizer with no audio behind it.
//!
//! It only tracks start/stop requests. Transcripts and errors are fed to the
//! orchestrator by whoever drives the test or terminal session.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::ports::{SpeechError, SpeechRecognizer};

#[derive(Debug, Clone, Default)]
pub struct ScriptedRecognizer {
    starts: Arc<AtomicUsize>,
    stops: Arc<AtomicUsize>,
    refuse_start: Arc<AtomicBool>,
}

impl ScriptedRecognizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `start` fail, like a denied microphone permission.
    pub fn refuse_start(&self, refuse: bool) {
        self.refuse_start.store(refuse, Ordering::SeqCst);
    }

    pub fn start_count(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

impl SpeechRecognizer for ScriptedRecognizer {
    fn start(&self) -> Result<(), SpeechError> {
        if self.refuse_start.load(Ordering::SeqCst) {
            return Err(SpeechError::Failed("not-allowed".to_string()));
        }
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_start_and_stop() {
        let recognizer = ScriptedRecognizer::new();

        recognizer.start().unwrap();
        recognizer.stop();
        recognizer.stop();

        assert_eq!(recognizer.start_count(), 1);
        assert_eq!(recognizer.stop_count(), 2);
    }

    #[test]
    fn refused_start_is_an_error() {
        let recognizer = ScriptedRecognizer::new();
        recognizer.refuse_start(true);

        assert_eq!(
            recognizer.start(),
            Err(SpeechError::Failed("not-allowed".to_string()))
        );
        assert_eq!(recognizer.start_count(), 0);
    }
}
