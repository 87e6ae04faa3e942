//! Session settings - voice, speech rate and sound preferences.
//!
//! Settings are persisted as a single JSON object. Loading is forgiving:
//! missing fields fall back to defaults and an out-of-range rate is clamped.

use serde::{Deserialize, Serialize};

use super::foundation::ValidationError;

/// Speech rate multiplier, always within `[SpeechRate::MIN, SpeechRate::MAX]`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct SpeechRate(f32);

impl SpeechRate {
    pub const MIN: f32 = 0.5;
    pub const MAX: f32 = 2.0;

    /// Creates a rate, rejecting values outside the allowed range.
    pub fn new(value: f32) -> Result<Self, ValidationError> {
        if value.is_finite() && (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Self(value))
        } else {
            Err(ValidationError::out_of_range("rate", Self::MIN, Self::MAX, value))
        }
    }

    /// Creates a rate, clamping into range. Non-finite values become the default.
    pub fn clamped(value: f32) -> Self {
        if value.is_finite() {
            Self(value.clamp(Self::MIN, Self::MAX))
        } else {
            Self::default()
        }
    }

    pub fn value(&self) -> f32 {
        self.0
    }
}

impl Default for SpeechRate {
    fn default() -> Self {
        Self(1.0)
    }
}

impl<'de> Deserialize<'de> for SpeechRate {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        // A stored zero means "never set".
        let raw = f32::deserialize(deserializer)?;
        if raw == 0.0 {
            Ok(Self::default())
        } else {
            Ok(Self::clamped(raw))
        }
    }
}

/// Persisted user preferences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSettings {
    /// Identifier of the chosen synthesizer voice.
    #[serde(default)]
    pub voice_id: Option<String>,
    /// Speech rate for vocalized replies.
    #[serde(default)]
    pub rate: SpeechRate,
    /// Whether interface sounds are played.
    #[serde(default = "default_sound_enabled")]
    pub sound_enabled: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            voice_id: None,
            rate: SpeechRate::default(),
            sound_enabled: default_sound_enabled(),
        }
    }
}

fn default_sound_enabled() -> bool {
    true
}

/// A voice offered by the speech synthesizer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voice {
    /// Stable identifier (the platform's voice URI).
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// BCP-47 language tag, e.g. `en-US`.
    pub lang: String,
}

impl Voice {
    pub fn new(id: impl Into<String>, name: impl Into<String>, lang: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            lang: lang.into(),
        }
    }
}

/// Voice names picked first when the user has no saved choice.
pub const PREFERRED_VOICE_NAMES: [&str; 3] = [
    "Google US English",
    "Samantha",
    "Microsoft Zira Desktop - English (United States)",
];

/// Resolves which voice to use.
///
/// Order: the saved voice if still available, a preferred voice name, an
/// `en-US` voice whose name mentions "female", any `en-US` voice, and
/// finally the first voice on offer.
pub fn choose_voice<'a>(voices: &'a [Voice], saved_id: Option<&str>) -> Option<&'a Voice> {
    if let Some(saved) = saved_id.and_then(|id| voices.iter().find(|v| v.id == id)) {
        return Some(saved);
    }

    voices
        .iter()
        .find(|v| PREFERRED_VOICE_NAMES.contains(&v.name.as_str()))
        .or_else(|| {
            voices.iter().find(|v| {
                v.lang.starts_with("en-US") && v.name.to_lowercase().contains("female")
            })
        })
        .or_else(|| voices.iter().find(|v| v.lang.starts_with("en-US")))
        .or_else(|| voices.first())
}
