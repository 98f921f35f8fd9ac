//! Logical queries and their fingerprints.
//!
//! A query is a filter plus the relay set it targets. Construction normalizes
//! both, so two logically identical queries built in any order hash to the
//! same [`QueryKey`], which is what the timeline cache is keyed by.

use driftline_core::Filter;
use sha2::{Digest, Sha256};
use std::fmt;

/// An immutable filter plus the relay set it targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    /// Normalized filter
    pub filter: Filter,
    /// Sorted, deduplicated relay URLs
    pub relays: Vec<String>,
}

impl Query {
    /// Build a query, normalizing the filter and relay set.
    pub fn new(filter: Filter, relays: Vec<String>) -> Self {
        let mut relays = relays;
        relays.sort();
        relays.dedup();
        Self {
            filter: filter.normalized(),
            relays,
        }
    }

    /// Stable fingerprint over the normalized filter and relay set.
    pub fn key(&self) -> QueryKey {
        let filter_json =
            serde_json::to_string(&self.filter).unwrap_or_else(|_| String::from("{}"));
        let mut hasher = Sha256::new();
        hasher.update(filter_json.as_bytes());
        hasher.update(b"\n");
        for relay in &self.relays {
            hasher.update(relay.as_bytes());
            hasher.update(b"\n");
        }
        QueryKey(hex::encode(hasher.finalize()))
    }
}

/// Fingerprint identifying one logical feed query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey(String);

impl QueryKey {
    /// The hex digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form is plenty for logs.
        write!(f, "{}", &self.0[..12.min(self.0.len())])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_is_construction_order_independent() {
        let a = Query::new(
            Filter::new()
                .kinds(vec![4, 1])
                .authors(vec!["b".to_string(), "a".to_string()]),
            vec![
                "wss://two.example.com".to_string(),
                "wss://one.example.com".to_string(),
            ],
        );
        let b = Query::new(
            Filter::new()
                .authors(vec!["a".to_string(), "b".to_string()])
                .kinds(vec![1, 4]),
            vec![
                "wss://one.example.com".to_string(),
                "wss://two.example.com".to_string(),
            ],
        );
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn test_key_distinguishes_relay_sets() {
        let filter = Filter::new().kinds(vec![1]);
        let a = Query::new(filter.clone(), vec!["wss://one.example.com".to_string()]);
        let b = Query::new(filter, vec!["wss://two.example.com".to_string()]);
        assert_ne!(a.key(), b.key());
    }

    #[test]
    fn test_key_distinguishes_filters() {
        let relays = vec!["wss://one.example.com".to_string()];
        let a = Query::new(Filter::new().kinds(vec![1]), relays.clone());
        let b = Query::new(Filter::new().kinds(vec![2]), relays);
        assert_ne!(a.key(), b.key());
    }

    #[test]
    fn test_relays_are_deduplicated() {
        let q = Query::new(
            Filter::new(),
            vec![
                "wss://one.example.com".to_string(),
                "wss://one.example.com".to_string(),
            ],
        );
        assert_eq!(q.relays.len(), 1);
    }

    #[test]
    fn test_key_display_is_short() {
        let q = Query::new(Filter::new(), vec![]);
        assert_eq!(q.key().to_string().len(), 12);
    }
}
