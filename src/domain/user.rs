//! User record produced by the local mock login.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::foundation::ValidationError;

/// A signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub name: String,
    pub email: String,
    /// Avatar image, base64 encoded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

impl User {
    /// Creates a user, requiring a name and a plausible email address.
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Result<Self, ValidationError> {
        let name = name.into();
        let email = email.into();

        if name.trim().is_empty() {
            return Err(ValidationError::empty_field("name"));
        }
        if email.trim().is_empty() {
            return Err(ValidationError::empty_field("email"));
        }
        if !email.contains('@') {
            return Err(ValidationError::invalid_format("email", "missing @ symbol"));
        }

        Ok(Self {
            name,
            email,
            avatar: None,
        })
    }

    /// Returns a copy with the avatar replaced.
    pub fn with_avatar(mut self, avatar: impl Into<String>) -> Self {
        self.avatar = Some(avatar.into());
        self
    }
}

/// Mood detected by the camera feature, used as a prompt hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mood {
    Happy,
    Sad,
    Surprised,
    Neutral,
}

impl fmt::Display for Mood {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Mood::Happy => "happy",
            Mood::Sad => "sad",
            Mood::Surprised => "surprised",
            Mood::Neutral => "neutral",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_requires_name_and_email() {
        assert!(matches!(
            User::new("", "a@b.c"),
            Err(ValidationError::EmptyField { .. })
        ));
        assert!(matches!(
            User::new("Ada", "  "),
            Err(ValidationError::EmptyField { .. })
        ));
        assert!(matches!(
            User::new("Ada", "ada.example.com"),
            Err(ValidationError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn user_avatar_is_optional_in_json() {
        let user = User::new("Ada", "ada@example.com").unwrap();
        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("avatar"));

        let with_avatar = user.with_avatar("data:image/png;base64,AAAA");
        let back: User = serde_json::from_str(&serde_json::to_string(&with_avatar).unwrap()).unwrap();
        assert_eq!(back.avatar.as_deref(), Some("data:image/png;base64,AAAA"));
    }

    #[test]
    fn mood_displays_lowercase() {
        assert_eq!(Mood::Surprised.to_string(), "surprised");
    }
}
