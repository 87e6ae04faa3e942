//! Speech Adapters
//!
//! Implementations of the speech ports for environments without a
//! platform speech engine.
//!
//! - **RecordingSynthesizer** - Records utterances instead of playing them
//! - **ScriptedRecognizer** - Tracks capture requests; events are fed by the caller

mod recording_synthesizer;
mod scripted_recognizer;

pub use recording_synthesizer::RecordingSynthesizer;
pub use scripted_recognizer::ScriptedRecognizer;
