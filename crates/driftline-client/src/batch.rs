//! Batching object cache.
//!
//! Resolves object keys (event id, profile, relay list, follow list) to their
//! events. Concurrent lookups for the same key share one in-flight result,
//! and all keys that arrive within a short window are flushed as one
//! multi-filter query against the broad relay set, so duplicate network
//! requests for a key are impossible by construction.
//!
//! Lookup order: bounded in-memory LRU, then the durable store (long-lived
//! kinds only), then the batched broad query, then a second-chance query
//! against the owner's declared write relays (resolved recursively through
//! this same cache). A miss everywhere is cached as a negative result with a
//! short TTL and returned as absent, never as an error.

use crate::pool::EventSource;
use crate::signer::DurableStore;
use driftline_core::{
    Event, Filter, KIND_FOLLOW_LIST, KIND_PROFILE, KIND_RELAY_LIST, RelayList, validate_event,
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Identity of a cacheable object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BatchKey {
    /// A single event by id
    EventId(String),
    /// The newest profile metadata of a pubkey
    Profile(String),
    /// The newest declared relay list of a pubkey
    RelayList(String),
    /// The newest follow list of a pubkey
    FollowList(String),
}

impl BatchKey {
    /// Owner pubkey for replaceable object keys.
    fn owner(&self) -> Option<&str> {
        match self {
            BatchKey::EventId(_) => None,
            BatchKey::Profile(pk) | BatchKey::RelayList(pk) | BatchKey::FollowList(pk) => Some(pk),
        }
    }

    /// Replaceable kind for the key, if it has one.
    fn kind(&self) -> Option<u16> {
        match self {
            BatchKey::EventId(_) => None,
            BatchKey::Profile(_) => Some(KIND_PROFILE),
            BatchKey::RelayList(_) => Some(KIND_RELAY_LIST),
            BatchKey::FollowList(_) => Some(KIND_FOLLOW_LIST),
        }
    }

    /// Whether the durable store is consulted for this key.
    fn is_durable(&self) -> bool {
        !matches!(self, BatchKey::EventId(_))
    }

    /// The filter that fetches exactly this object.
    fn filter(&self) -> Filter {
        match self {
            BatchKey::EventId(id) => Filter::new().ids(vec![id.clone()]),
            BatchKey::Profile(pk) => Filter::new()
                .kinds(vec![KIND_PROFILE])
                .authors(vec![pk.clone()]),
            BatchKey::RelayList(pk) => Filter::new()
                .kinds(vec![KIND_RELAY_LIST])
                .authors(vec![pk.clone()]),
            BatchKey::FollowList(pk) => Filter::new()
                .kinds(vec![KIND_FOLLOW_LIST])
                .authors(vec![pk.clone()]),
        }
    }
}

/// Cache configuration.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Bound on the in-memory cache
    pub max_entries: usize,
    /// How long lookups accumulate before one flush
    pub batch_window: Duration,
    /// How long a negative result stays fresh
    pub negative_ttl: Duration,
    /// Broad relays queried first for any key
    pub broad_relays: Vec<String>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            batch_window: Duration::from_millis(30),
            negative_ttl: Duration::from_secs(60),
            broad_relays: Vec::new(),
        }
    }
}

struct CacheEntry {
    /// `None` is a cached negative result
    value: Option<Event>,
    cached_at: tokio::time::Instant,
}

/// Bounded key/value store with LRU eviction.
#[derive(Default)]
struct Store {
    entries: HashMap<BatchKey, CacheEntry>,
    lru: VecDeque<BatchKey>,
}

impl Store {
    fn get(&mut self, key: &BatchKey, negative_ttl: Duration) -> Option<Option<Event>> {
        let fresh = match self.entries.get(key) {
            Some(entry) => entry.value.is_some() || entry.cached_at.elapsed() < negative_ttl,
            None => return None,
        };
        if !fresh {
            self.entries.remove(key);
            self.lru.retain(|k| k != key);
            return None;
        }
        self.lru.retain(|k| k != key);
        self.lru.push_back(key.clone());
        self.entries.get(key).map(|entry| entry.value.clone())
    }

    fn insert(&mut self, key: BatchKey, value: Option<Event>, max_entries: usize) {
        if self.entries.contains_key(&key) {
            self.lru.retain(|k| k != &key);
        } else if self.entries.len() >= max_entries
            && let Some(oldest) = self.lru.pop_front()
        {
            self.entries.remove(&oldest);
        }
        self.lru.push_back(key.clone());
        self.entries.insert(
            key,
            CacheEntry {
                value,
                cached_at: tokio::time::Instant::now(),
            },
        );
    }

    /// Insert a replaceable object, keeping whichever version is newest.
    fn insert_newest(&mut self, key: BatchKey, event: Event, max_entries: usize) {
        if let Some(existing) = self.entries.get(&key)
            && let Some(old) = &existing.value
            && old.created_at >= event.created_at
        {
            return;
        }
        self.insert(key, Some(event), max_entries);
    }
}

/// Lookups waiting on a result, keyed by the object they want.
#[derive(Default)]
struct Pending {
    waiters: HashMap<BatchKey, Vec<oneshot::Sender<Option<Event>>>>,
    queue: Vec<BatchKey>,
}

/// Batching, deduplicating object cache.
pub struct ObjectCache {
    config: BatchConfig,
    source: Arc<dyn EventSource>,
    durable: Option<Arc<dyn DurableStore>>,
    store: Mutex<Store>,
    pending: Mutex<Pending>,
    flush_tx: mpsc::UnboundedSender<()>,
}

impl ObjectCache {
    /// Create the cache and start its background flusher.
    pub fn new(
        config: BatchConfig,
        source: Arc<dyn EventSource>,
        durable: Option<Arc<dyn DurableStore>>,
    ) -> Arc<Self> {
        let (flush_tx, flush_rx) = mpsc::unbounded_channel();
        let cache = Arc::new(Self {
            config,
            source,
            durable,
            store: Mutex::new(Store::default()),
            pending: Mutex::new(Pending::default()),
            flush_tx,
        });
        Self::spawn_flusher(Arc::downgrade(&cache), flush_rx);
        cache
    }

    fn spawn_flusher(cache: Weak<Self>, mut signals: mpsc::UnboundedReceiver<()>) {
        tokio::spawn(async move {
            while signals.recv().await.is_some() {
                let Some(window) = cache.upgrade().map(|c| c.config.batch_window) else {
                    break;
                };
                tokio::time::sleep(window).await;
                // Coalesce every signal that arrived during the window.
                while signals.try_recv().is_ok() {}
                let Some(cache) = cache.upgrade() else { break };
                // Flushes run detached: a second-chance lookup inside one
                // flush enqueues new keys that need the flusher free.
                tokio::spawn(async move { cache.flush().await });
            }
        });
    }

    /// Resolve a key to its event, or absent.
    pub async fn lookup(&self, key: BatchKey) -> Option<Event> {
        if let Some(value) = self.cached(&key) {
            return value;
        }

        if key.is_durable()
            && let Some(durable) = &self.durable
            && let (Some(owner), Some(kind)) = (key.owner(), key.kind())
            && let Some(event) = durable.get(owner, kind).await
        {
            if validate_event(&event) {
                let mut store = self.store.lock().unwrap();
                store.insert_newest(key.clone(), event.clone(), self.config.max_entries);
                return Some(event);
            }
            warn!("dropping malformed durable object for {:?}", key);
        }

        let rx = {
            let mut pending = self.pending.lock().unwrap();
            let (tx, rx) = oneshot::channel();
            match pending.waiters.get_mut(&key) {
                Some(waiters) => waiters.push(tx),
                None => {
                    pending.waiters.insert(key.clone(), vec![tx]);
                    pending.queue.push(key);
                    let _ = self.flush_tx.send(());
                }
            }
            rx
        };
        rx.await.unwrap_or(None)
    }

    /// Memory-only lookup of an event body; never touches the network.
    pub fn cached_event(&self, id: &str) -> Option<Event> {
        self.cached(&BatchKey::EventId(id.to_string())).flatten()
    }

    /// Seed the cache with an event already in hand (e.g. one that arrived
    /// through a timeline subscription), under every key it answers for.
    pub fn insert_event(&self, event: Event) {
        if !validate_event(&event) {
            return;
        }
        let mut store = self.store.lock().unwrap();
        store.insert(
            BatchKey::EventId(event.id.clone()),
            Some(event.clone()),
            self.config.max_entries,
        );
        if let Some(key) = replaceable_key(&event) {
            store.insert_newest(key, event, self.config.max_entries);
        }
    }

    fn cached(&self, key: &BatchKey) -> Option<Option<Event>> {
        self.store
            .lock()
            .unwrap()
            .get(key, self.config.negative_ttl)
    }

    /// One flush cycle: answer everything currently queued.
    async fn flush(&self) {
        let keys: Vec<BatchKey> = std::mem::take(&mut self.pending.lock().unwrap().queue);
        if keys.is_empty() {
            return;
        }

        // Keys that became fresh while queued resolve from memory.
        let mut need = Vec::new();
        for key in keys {
            match self.cached(&key) {
                Some(value) => self.resolve(&key, value),
                None => need.push(key),
            }
        }
        if need.is_empty() {
            return;
        }

        debug!("flushing batched lookup of {} keys", need.len());
        let filters = build_filters(&need);
        let events = self
            .source
            .fetch(&self.config.broad_relays, filters)
            .await;
        for event in events {
            self.insert_event(event);
        }

        let mut missed = Vec::new();
        for key in need {
            match self.cached(&key) {
                Some(value) => {
                    self.persist_durable(&key, &value).await;
                    self.resolve(&key, value);
                }
                None => missed.push(key),
            }
        }

        for key in missed {
            match self.second_chance(&key).await {
                Some(event) => {
                    self.persist_durable(&key, &Some(event.clone())).await;
                    self.resolve(&key, Some(event));
                }
                None => {
                    self.store.lock().unwrap().insert(
                        key.clone(),
                        None,
                        self.config.max_entries,
                    );
                    self.resolve(&key, None);
                }
            }
        }
    }

    /// Retry a missed key against the owner's declared write relays.
    ///
    /// Relay-list keys themselves have nowhere further to go, which also
    /// bounds the recursion through `lookup`.
    async fn second_chance(&self, key: &BatchKey) -> Option<Event> {
        if matches!(key, BatchKey::RelayList(_)) {
            return None;
        }
        let owner = key.owner()?;
        let list_event = self.lookup(BatchKey::RelayList(owner.to_string())).await?;
        let relays = RelayList::from_event(&list_event).ok()?.write_relays();
        if relays.is_empty() {
            return None;
        }

        debug!("second-chance lookup of {:?} on {} relays", key, relays.len());
        let events = self.source.fetch(&relays, vec![key.filter()]).await;
        for event in events {
            self.insert_event(event);
        }
        self.cached(key).flatten()
    }

    async fn persist_durable(&self, key: &BatchKey, value: &Option<Event>) {
        if key.is_durable()
            && let Some(durable) = &self.durable
            && let Some(event) = value
        {
            durable.put(event).await;
        }
    }

    fn resolve(&self, key: &BatchKey, value: Option<Event>) {
        let waiters = self.pending.lock().unwrap().waiters.remove(key);
        if let Some(waiters) = waiters {
            for tx in waiters {
                let _ = tx.send(value.clone());
            }
        }
    }
}

/// The key an event answers for besides its id, if any.
fn replaceable_key(event: &Event) -> Option<BatchKey> {
    match event.kind {
        KIND_PROFILE => Some(BatchKey::Profile(event.pubkey.clone())),
        KIND_FOLLOW_LIST => Some(BatchKey::FollowList(event.pubkey.clone())),
        KIND_RELAY_LIST => Some(BatchKey::RelayList(event.pubkey.clone())),
        _ => None,
    }
}

/// Group queued keys into one multi-filter query.
fn build_filters(keys: &[BatchKey]) -> Vec<Filter> {
    let mut ids = Vec::new();
    let mut profiles = Vec::new();
    let mut follows = Vec::new();
    let mut relay_lists = Vec::new();
    for key in keys {
        match key {
            BatchKey::EventId(id) => ids.push(id.clone()),
            BatchKey::Profile(pk) => profiles.push(pk.clone()),
            BatchKey::FollowList(pk) => follows.push(pk.clone()),
            BatchKey::RelayList(pk) => relay_lists.push(pk.clone()),
        }
    }

    let mut filters = Vec::new();
    if !ids.is_empty() {
        filters.push(Filter::new().ids(ids));
    }
    if !profiles.is_empty() {
        filters.push(Filter::new().kinds(vec![KIND_PROFILE]).authors(profiles));
    }
    if !follows.is_empty() {
        filters.push(Filter::new().kinds(vec![KIND_FOLLOW_LIST]).authors(follows));
    }
    if !relay_lists.is_empty() {
        filters.push(
            Filter::new()
                .kinds(vec![KIND_RELAY_LIST])
                .authors(relay_lists),
        );
    }
    filters
}
