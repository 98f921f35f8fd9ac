//! Follow lists (kind 3).
//!
//! A replaceable event whose p-tags enumerate the profiles an author follows.
//! Each p-tag may carry an optional relay URL hint and an optional petname.

use crate::event::{Event, KIND_FOLLOW_LIST};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur parsing follow lists.
#[derive(Debug, Error)]
pub enum FollowListError {
    #[error("event is not a follow list (kind {0})")]
    InvalidKind(u16),
}

/// A single followed profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Follow {
    /// Public key of the followed profile (32-byte hex)
    pub pubkey: String,

    /// Optional relay URL where the profile can be found
    pub relay_url: Option<String>,

    /// Optional local petname
    pub petname: Option<String>,
}

/// A parsed follow list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FollowList {
    /// Author of the list
    pub author: String,
    /// Timestamp of the list event
    pub created_at: u64,
    /// Followed profiles, in tag order
    pub follows: Vec<Follow>,
}

impl FollowList {
    /// Parse a follow list from a kind-3 event.
    ///
    /// Tags that are not well-formed p-tags are skipped, not fatal.
    pub fn from_event(event: &Event) -> Result<Self, FollowListError> {
        if event.kind != KIND_FOLLOW_LIST {
            return Err(FollowListError::InvalidKind(event.kind));
        }

        let follows = event
            .tags
            .iter()
            .filter(|t| t.len() >= 2 && t[0] == "p" && !t[1].is_empty())
            .map(|t| Follow {
                pubkey: t[1].clone(),
                relay_url: t.get(2).filter(|s| !s.is_empty()).cloned(),
                petname: t.get(3).filter(|s| !s.is_empty()).cloned(),
            })
            .collect();

        Ok(Self {
            author: event.pubkey.clone(),
            created_at: event.created_at,
            follows,
        })
    }

    /// Whether the list contains the given pubkey.
    pub fn contains(&self, pubkey: &str) -> bool {
        self.follows.iter().any(|f| f.pubkey == pubkey)
    }

    /// The followed pubkeys, in tag order.
    pub fn pubkeys(&self) -> Vec<String> {
        self.follows.iter().map(|f| f.pubkey.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn follow_event(tags: Vec<Vec<String>>) -> Event {
        Event {
            id: "a".repeat(64),
            pubkey: "b".repeat(64),
            created_at: 10,
            kind: KIND_FOLLOW_LIST,
            tags,
            content: String::new(),
            sig: "c".repeat(128),
        }
    }

    #[test]
    fn test_from_event_parses_p_tags() {
        let event = follow_event(vec![
            vec!["p".to_string(), "alice".to_string()],
            vec![
                "p".to_string(),
                "bob".to_string(),
                "wss://relay.example.com".to_string(),
                "bobby".to_string(),
            ],
        ]);
        let list = FollowList::from_event(&event).unwrap();
        assert_eq!(list.follows.len(), 2);
        assert_eq!(list.follows[0].pubkey, "alice");
        assert!(list.follows[0].relay_url.is_none());
        assert_eq!(
            list.follows[1].relay_url.as_deref(),
            Some("wss://relay.example.com")
        );
        assert_eq!(list.follows[1].petname.as_deref(), Some("bobby"));
    }

    #[test]
    fn test_from_event_skips_other_tags() {
        let event = follow_event(vec![
            vec!["e".to_string(), "some-event".to_string()],
            vec!["p".to_string()],
            vec!["p".to_string(), "alice".to_string()],
        ]);
        let list = FollowList::from_event(&event).unwrap();
        assert_eq!(list.pubkeys(), vec!["alice".to_string()]);
    }

    #[test]
    fn test_from_event_wrong_kind() {
        let mut event = follow_event(vec![]);
        event.kind = 1;
        assert!(matches!(
            FollowList::from_event(&event),
            Err(FollowListError::InvalidKind(1))
        ));
    }

    #[test]
    fn test_contains() {
        let event = follow_event(vec![vec!["p".to_string(), "alice".to_string()]]);
        let list = FollowList::from_event(&event).unwrap();
        assert!(list.contains("alice"));
        assert!(!list.contains("bob"));
    }
}
