//! Core event structures and timeline ordering.
//!
//! Events are immutable, content-addressed records: once an event passes
//! structural validation it is treated as immutable and cacheable forever.
//! Timelines never hold full event bodies in their ordering structure; they
//! hold [`EventRef`]s, whose `Ord` implementation *is* the timeline order
//! (newest first, id as tiebreak).

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A signed event as served by relays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// 32-byte lowercase hex-encoded hash of the serialized event data
    pub id: String,
    /// 32-byte lowercase hex-encoded public key of the event author
    pub pubkey: String,
    /// Unix timestamp in seconds
    pub created_at: u64,
    /// Event kind (integer between 0 and 65535)
    pub kind: u16,
    /// Array of arrays of strings (tags)
    pub tags: Vec<Vec<String>>,
    /// Arbitrary string content
    pub content: String,
    /// 64-byte lowercase hex signature
    pub sig: String,
}

impl Event {
    /// First value of the first tag named `name`, if any.
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.len() >= 2 && t[0] == name)
            .map(|t| t[1].as_str())
    }

    /// All values of tags named `name`.
    pub fn tag_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> {
        self.tags
            .iter()
            .filter(move |t| t.len() >= 2 && t[0] == name)
            .map(|t| t[1].as_str())
    }
}

/// An unsigned event draft, handed to the signer capability.
///
/// The author's public key is derived from the signing key, so drafts do not
/// carry one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventTemplate {
    /// Unix timestamp in seconds
    pub created_at: u64,
    /// Event kind
    pub kind: u16,
    /// Array of arrays of strings (tags)
    pub tags: Vec<Vec<String>>,
    /// Arbitrary string content
    pub content: String,
}

/// A lightweight `(id, created_at)` pair used inside timelines.
///
/// `Ord` follows timeline position, not numeric order: `a < b` means `a`
/// appears before `b` in a timeline, i.e. `a` is newer. Sorting a vector of
/// refs ascending therefore yields newest-first order, with ids compared
/// descending as tiebreak so equal timestamps still order deterministically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRef {
    pub id: String,
    pub created_at: u64,
}

impl EventRef {
    pub fn new(id: impl Into<String>, created_at: u64) -> Self {
        Self {
            id: id.into(),
            created_at,
        }
    }

    /// The ref of a full event.
    pub fn of(event: &Event) -> Self {
        Self {
            id: event.id.clone(),
            created_at: event.created_at,
        }
    }
}

impl Ord for EventRef {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .created_at
            .cmp(&self.created_at)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for EventRef {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Event kind classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KindClassification {
    /// Events expected to be stored by relays
    Regular,
    /// Only the latest event per author+kind is retained
    Replaceable,
    /// Not expected to be stored by relays
    Ephemeral,
    /// Only the latest event per author+kind+d-tag is retained
    Addressable,
}

/// Classify a kind number.
pub fn classify_kind(kind: u16) -> KindClassification {
    match kind {
        0 | 3 => KindClassification::Replaceable,
        10000..=19999 => KindClassification::Replaceable,
        20000..=29999 => KindClassification::Ephemeral,
        30000..=39999 => KindClassification::Addressable,
        _ => KindClassification::Regular,
    }
}

// Standard event kinds the engine cares about
pub const KIND_PROFILE: u16 = 0;
pub const KIND_NOTE: u16 = 1;
pub const KIND_FOLLOW_LIST: u16 = 3;
pub const KIND_RELAY_LIST: u16 = 10002;
pub const KIND_CLIENT_AUTH: u16 = 22242;

fn is_lower_hex(s: &str, len: usize) -> bool {
    s.len() == len
        && s.chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
}

/// Structural validation of a signed event.
///
/// Checks shapes only (hex lengths, lowercase); signature verification is the
/// signer capability's concern. Malformed events are dropped by callers, one
/// event at a time, without closing the subscription that carried them.
pub fn validate_event(event: &Event) -> bool {
    is_lower_hex(&event.id, 64) && is_lower_hex(&event.pubkey, 64) && is_lower_hex(&event.sig, 128)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex_id(seed: u8) -> String {
        format!("{:02x}", seed).repeat(32)
    }

    fn test_event(seed: u8, created_at: u64) -> Event {
        Event {
            id: hex_id(seed),
            pubkey: hex_id(0xaa),
            created_at,
            kind: KIND_NOTE,
            tags: vec![],
            content: "hello".to_string(),
            sig: hex_id(0xbb).repeat(2),
        }
    }

    #[test]
    fn test_validate_event_accepts_well_formed() {
        assert!(validate_event(&test_event(1, 100)));
    }

    #[test]
    fn test_validate_event_rejects_bad_id() {
        let mut event = test_event(1, 100);
        event.id = "short".to_string();
        assert!(!validate_event(&event));

        let mut event = test_event(1, 100);
        event.id = event.id.to_uppercase();
        assert!(!validate_event(&event));
    }

    #[test]
    fn test_validate_event_rejects_bad_sig() {
        let mut event = test_event(1, 100);
        event.sig = hex_id(0xbb);
        assert!(!validate_event(&event));
    }

    #[test]
    fn test_ref_order_newest_first() {
        let mut refs = vec![
            EventRef::new(hex_id(1), 100),
            EventRef::new(hex_id(2), 300),
            EventRef::new(hex_id(3), 200),
        ];
        refs.sort();
        let stamps: Vec<u64> = refs.iter().map(|r| r.created_at).collect();
        assert_eq!(stamps, vec![300, 200, 100]);
    }

    #[test]
    fn test_ref_order_id_tiebreak() {
        let a = EventRef::new(hex_id(0x0a), 100);
        let b = EventRef::new(hex_id(0x0b), 100);
        // Larger id sorts first for equal timestamps.
        assert!(b < a);
    }

    #[test]
    fn test_ref_of_event() {
        let event = test_event(7, 42);
        let r = EventRef::of(&event);
        assert_eq!(r.id, event.id);
        assert_eq!(r.created_at, 42);
    }

    #[test]
    fn test_classify_kind() {
        assert_eq!(classify_kind(KIND_PROFILE), KindClassification::Replaceable);
        assert_eq!(classify_kind(KIND_NOTE), KindClassification::Regular);
        assert_eq!(
            classify_kind(KIND_FOLLOW_LIST),
            KindClassification::Replaceable
        );
        assert_eq!(
            classify_kind(KIND_RELAY_LIST),
            KindClassification::Replaceable
        );
        assert_eq!(classify_kind(KIND_CLIENT_AUTH), KindClassification::Ephemeral);
        assert_eq!(classify_kind(30023), KindClassification::Addressable);
    }

    #[test]
    fn test_tag_value() {
        let mut event = test_event(1, 100);
        event.tags = vec![
            vec!["e".to_string(), "target".to_string()],
            vec!["p".to_string(), "alice".to_string()],
            vec!["p".to_string(), "bob".to_string()],
        ];
        assert_eq!(event.tag_value("e"), Some("target"));
        assert_eq!(event.tag_value("missing"), None);
        let ps: Vec<&str> = event.tag_values("p").collect();
        assert_eq!(ps, vec!["alice", "bob"]);
    }

    #[test]
    fn test_event_serde_round_trip() {
        let event = test_event(1, 100);
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(event, back);
    }
}
