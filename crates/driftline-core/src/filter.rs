//! Subscription filters.
//!
//! A filter is an immutable predicate selecting a subset of events. Filters
//! are sent to relays verbatim and also evaluated locally via [`Filter::matches`].
//! [`Filter::normalized`] produces the canonical form used for query
//! fingerprinting: two filters that select the same events (same constraint
//! sets, any construction order) normalize identically.

use crate::event::Event;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Filter for subscription requests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    /// Event IDs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<String>>,

    /// Authors (pubkeys)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<String>>,

    /// Event kinds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<u16>>,

    /// Events since timestamp (inclusive)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<u64>,

    /// Events until timestamp (inclusive)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub until: Option<u64>,

    /// Maximum number of events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,

    /// Generic tag queries (e.g. #e, #p). Keys carry the `#` prefix; values
    /// are the accepted tag values. A sorted map so serialization of the
    /// normalized form is deterministic.
    #[serde(flatten, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, Vec<String>>,
}

impl Filter {
    /// Create a new empty filter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter by event IDs.
    pub fn ids(mut self, ids: Vec<String>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Filter by authors.
    pub fn authors(mut self, authors: Vec<String>) -> Self {
        self.authors = Some(authors);
        self
    }

    /// Filter by kinds.
    pub fn kinds(mut self, kinds: Vec<u16>) -> Self {
        self.kinds = Some(kinds);
        self
    }

    /// Filter by events since timestamp.
    pub fn since(mut self, timestamp: u64) -> Self {
        self.since = Some(timestamp);
        self
    }

    /// Filter by events until timestamp.
    pub fn until(mut self, timestamp: u64) -> Self {
        self.until = Some(timestamp);
        self
    }

    /// Limit number of results.
    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }

    /// Add a tag constraint. The key is the tag letter (e.g. "e", "p").
    pub fn tag(mut self, key: impl Into<String>, values: Vec<String>) -> Self {
        self.tags.insert(format!("#{}", key.into()), values);
        self
    }

    /// Filter by #e (event reference) tags.
    pub fn event_refs(self, event_ids: Vec<String>) -> Self {
        self.tag("e", event_ids)
    }

    /// Filter by #p (pubkey reference) tags.
    pub fn pubkey_refs(self, pubkeys: Vec<String>) -> Self {
        self.tag("p", pubkeys)
    }

    /// Canonical form: every constraint list sorted and deduplicated.
    ///
    /// Logically identical filters built in different orders normalize to the
    /// same value, so their serializations (and any fingerprint derived from
    /// them) are equal.
    pub fn normalized(&self) -> Filter {
        fn canon(v: &Option<Vec<String>>) -> Option<Vec<String>> {
            v.as_ref().map(|v| {
                let mut v = v.clone();
                v.sort();
                v.dedup();
                v
            })
        }

        let kinds = self.kinds.as_ref().map(|k| {
            let mut k = k.clone();
            k.sort_unstable();
            k.dedup();
            k
        });

        let tags = self
            .tags
            .iter()
            .map(|(k, v)| {
                let mut v = v.clone();
                v.sort();
                v.dedup();
                (k.clone(), v)
            })
            .collect();

        Filter {
            ids: canon(&self.ids),
            authors: canon(&self.authors),
            kinds,
            since: self.since,
            until: self.until,
            limit: self.limit,
            tags,
        }
    }

    /// Whether the event satisfies every constraint of this filter.
    ///
    /// The `limit` field is a result-size bound, not a predicate, and is
    /// ignored here.
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(ids) = &self.ids
            && !ids.iter().any(|id| *id == event.id)
        {
            return false;
        }
        if let Some(authors) = &self.authors
            && !authors.iter().any(|a| *a == event.pubkey)
        {
            return false;
        }
        if let Some(kinds) = &self.kinds
            && !kinds.contains(&event.kind)
        {
            return false;
        }
        if let Some(since) = self.since
            && event.created_at < since
        {
            return false;
        }
        if let Some(until) = self.until
            && event.created_at > until
        {
            return false;
        }
        for (key, values) in &self.tags {
            let Some(name) = key.strip_prefix('#') else {
                continue;
            };
            if !event
                .tag_values(name)
                .any(|v| values.iter().any(|w| w == v))
            {
                return false;
            }
        }
        true
    }
}
