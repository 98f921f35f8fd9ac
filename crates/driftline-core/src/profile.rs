//! Profile metadata (kind 0).
//!
//! A replaceable event whose content is a JSON document describing the
//! author. Parsing is lenient: unknown fields are ignored and missing fields
//! stay `None`, since profiles in the wild carry all sorts of extras.

use crate::event::{Event, KIND_PROFILE};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur parsing profile metadata.
#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("event is not profile metadata (kind {0})")]
    InvalidKind(u16),

    #[error("invalid profile content: {0}")]
    InvalidContent(String),
}

/// Profile metadata parsed from a kind-0 event's content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub about: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub banner: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,

    /// DNS-based identifier claimed by the profile
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nip05: Option<String>,
}

impl Profile {
    /// Parse profile metadata from a kind-0 event.
    pub fn from_event(event: &Event) -> Result<Self, ProfileError> {
        if event.kind != KIND_PROFILE {
            return Err(ProfileError::InvalidKind(event.kind));
        }
        if event.content.trim().is_empty() {
            return Ok(Profile::default());
        }
        serde_json::from_str(&event.content)
            .map_err(|e| ProfileError::InvalidContent(e.to_string()))
    }

    /// Best display label: display name, then name.
    pub fn label(&self) -> Option<&str> {
        self.display_name
            .as_deref()
            .filter(|s| !s.is_empty())
            .or(self.name.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile_event(content: &str) -> Event {
        Event {
            id: "a".repeat(64),
            pubkey: "b".repeat(64),
            created_at: 1,
            kind: KIND_PROFILE,
            tags: vec![],
            content: content.to_string(),
            sig: "c".repeat(128),
        }
    }

    #[test]
    fn test_from_event_parses_known_fields() {
        let event =
            profile_event(r#"{"name":"alice","about":"hi","picture":"https://x/y.png"}"#);
        let profile = Profile::from_event(&event).unwrap();
        assert_eq!(profile.name.as_deref(), Some("alice"));
        assert_eq!(profile.about.as_deref(), Some("hi"));
        assert!(profile.display_name.is_none());
    }

    #[test]
    fn test_from_event_ignores_unknown_fields() {
        let event = profile_event(r#"{"name":"alice","lud16":"a@b.c","custom":{"x":1}}"#);
        let profile = Profile::from_event(&event).unwrap();
        assert_eq!(profile.name.as_deref(), Some("alice"));
    }

    #[test]
    fn test_from_event_parses_nip05() {
        let event = profile_event(r#"{"name":"alice","nip05":"alice@example.com"}"#);
        let profile = Profile::from_event(&event).unwrap();
        assert_eq!(profile.nip05.as_deref(), Some("alice@example.com"));
    }

    #[test]
    fn test_from_event_empty_content() {
        let event = profile_event("");
        let profile = Profile::from_event(&event).unwrap();
        assert_eq!(profile, Profile::default());
    }

    #[test]
    fn test_from_event_wrong_kind() {
        let mut event = profile_event("{}");
        event.kind = 1;
        assert!(matches!(
            Profile::from_event(&event),
            Err(ProfileError::InvalidKind(1))
        ));
    }

    #[test]
    fn test_from_event_malformed_content() {
        let event = profile_event("not json");
        assert!(matches!(
            Profile::from_event(&event),
            Err(ProfileError::InvalidContent(_))
        ));
    }

    #[test]
    fn test_label_prefers_display_name() {
        let profile = Profile {
            name: Some("alice".to_string()),
            display_name: Some("Alice".to_string()),
            ..Default::default()
        };
        assert_eq!(profile.label(), Some("Alice"));

        let profile = Profile {
            name: Some("alice".to_string()),
            display_name: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(profile.label(), Some("alice"));
    }
}
