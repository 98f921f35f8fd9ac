//! Timeline cache.
//!
//! Persists the merged result of a multiplexed subscription under its query
//! key, so re-opening the same logical feed can paint from cache before the
//! network answers, and pagination can be served from cache first.
//!
//! The refs of a timeline are a contiguous, duplicate-free, sorted prefix of
//! the true union of matching events across the relay set visited so far.
//! They may be incomplete, never inconsistent: every mutating method is
//! synchronous and enforces the ordering invariant itself.

use crate::query::{Query, QueryKey};
use driftline_core::EventRef;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use tracing::debug;

/// The cached, ordered result set for one logical feed query.
#[derive(Debug, Clone)]
pub struct Timeline {
    /// The query that produced this timeline
    pub query: Query,
    /// Sorted refs, newest first
    refs: Vec<EventRef>,
    /// Ids present in `refs`
    ids: HashSet<String>,
    /// Bumped on every mutation
    generation: u64,
}

impl Timeline {
    fn new(query: Query) -> Self {
        Self {
            query,
            refs: Vec::new(),
            ids: HashSet::new(),
            generation: 0,
        }
    }

    /// The refs, newest first.
    pub fn refs(&self) -> &[EventRef] {
        &self.refs
    }

    /// Newest cached ref.
    pub fn newest(&self) -> Option<&EventRef> {
        self.refs.first()
    }

    /// Oldest cached ref.
    pub fn oldest(&self) -> Option<&EventRef> {
        self.refs.last()
    }

    pub fn len(&self) -> usize {
        self.refs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    /// Mutation counter.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn set_refs(&mut self, mut refs: Vec<EventRef>) {
        refs.sort();
        self.ids.clear();
        self.refs.clear();
        for r in refs {
            if self.ids.insert(r.id.clone()) {
                self.refs.push(r);
            }
        }
        self.generation += 1;
    }

    fn insert_sorted(&mut self, r: EventRef) -> bool {
        if self.ids.contains(&r.id) {
            return false;
        }
        // The cache holds a contiguous prefix: a ref older than the oldest
        // cached one belongs to pagination, not to the live merge path.
        if let Some(oldest) = self.refs.last()
            && r > *oldest
        {
            return false;
        }
        let pos = self.refs.binary_search(&r).unwrap_or_else(|p| p);
        self.ids.insert(r.id.clone());
        self.refs.insert(pos, r);
        self.generation += 1;
        true
    }

    fn append_older(&mut self, older: Vec<EventRef>) -> usize {
        let mut older = older;
        older.sort();

        let mut appended = 0;
        for r in older {
            if self.ids.contains(&r.id) {
                continue;
            }
            // Only refs strictly past the current tail keep the sequence
            // sorted; anything inside the cached range is a duplicate by
            // position.
            if let Some(oldest) = self.refs.last()
                && r < *oldest
            {
                continue;
            }
            self.ids.insert(r.id.clone());
            self.refs.push(r);
            appended += 1;
        }
        if appended > 0 {
            self.generation += 1;
        }
        appended
    }
}

/// Keyed store of timelines, shared by every logical query in the process.
///
/// Explicitly constructed and injected, never ambient. All mutation happens
/// under a short synchronous lock; nothing awaits while holding it.
#[derive(Debug, Default)]
pub struct TimelineStore {
    timelines: RwLock<HashMap<QueryKey, Timeline>>,
}

impl TimelineStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The timeline for a key, if one exists.
    pub fn get(&self, key: &QueryKey) -> Option<Timeline> {
        self.timelines.read().unwrap().get(key).cloned()
    }

    /// Whether a timeline exists for the key.
    pub fn contains(&self, key: &QueryKey) -> bool {
        self.timelines.read().unwrap().contains_key(key)
    }

    /// Number of cached timelines.
    pub fn len(&self) -> usize {
        self.timelines.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.timelines.read().unwrap().is_empty()
    }

    /// Store the first complete snapshot for a key. No-op when a timeline
    /// already exists (later snapshots go through [`Self::merge_new_event`]).
    pub fn prime_from_snapshot(&self, key: &QueryKey, query: &Query, refs: Vec<EventRef>) -> bool {
        let mut map = self.timelines.write().unwrap();
        if map.contains_key(key) {
            return false;
        }
        let mut timeline = Timeline::new(query.clone());
        timeline.set_refs(refs);
        debug!("primed timeline {} with {} refs", key, timeline.len());
        map.insert(key.clone(), timeline);
        true
    }

    /// Insert a live ref at its sorted position. No-op on duplicates and on
    /// refs older than the oldest cached one.
    pub fn merge_new_event(&self, key: &QueryKey, r: EventRef) -> bool {
        let mut map = self.timelines.write().unwrap();
        match map.get_mut(key) {
            Some(timeline) => timeline.insert_sorted(r),
            None => false,
        }
    }

    /// Grow the cached prefix with older refs from pagination. Returns how
    /// many refs were appended after deduplication.
    pub fn extend_backward(&self, key: &QueryKey, older: Vec<EventRef>) -> usize {
        let mut map = self.timelines.write().unwrap();
        match map.get_mut(key) {
            Some(timeline) => timeline.append_older(older),
            None => 0,
        }
    }

    /// Drop a timeline.
    pub fn evict(&self, key: &QueryKey) -> bool {
        self.timelines.write().unwrap().remove(key).is_some()
    }
}
