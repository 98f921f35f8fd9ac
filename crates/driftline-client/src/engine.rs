//! Feed engine: the composition root.
//!
//! Ties the relay pool, the timeline store and the object cache together and
//! exposes the three operations features actually call: open a live timeline,
//! page it backward, publish. Every collaborator is constructed explicitly
//! and injected, so each layer stays testable in isolation.

use crate::auth::Authenticator;
use crate::batch::{BatchConfig, BatchKey, ObjectCache};
use crate::connection::PublishConfirmation;
use crate::error::{ClientError, Result};
use crate::multiplex::{FeedUpdate, SubOptions, TimelineSubscription};
use crate::pool::{EventSource, PoolConfig, RelayPool};
use crate::publish::publish_event;
use crate::query::{Query, QueryKey};
use crate::relay_selection::RelaySelector;
use crate::signer::{DurableStore, Signer};
use crate::timeline::{Timeline, TimelineStore};
use driftline_core::{Event, EventRef, validate_event};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Engine configuration.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Relay pool configuration
    pub pool: PoolConfig,
    /// Object cache configuration; an empty `broad_relays` inherits
    /// `broad_relays` below
    pub batch: BatchConfig,
    /// Default subscription options for [`FeedEngine::open_timeline`]
    pub sub: SubOptions,
    /// Relays queried when nothing more specific is known
    pub broad_relays: Vec<String>,
}

/// The multi-relay timeline synchronization engine.
pub struct FeedEngine {
    pool: Arc<RelayPool>,
    source: Arc<dyn EventSource>,
    store: Arc<TimelineStore>,
    objects: Arc<ObjectCache>,
    selector: RelaySelector,
    authenticator: Arc<Authenticator>,
    defaults: SubOptions,
}

impl FeedEngine {
    /// Build an engine with its own relay pool.
    pub fn new(
        config: EngineConfig,
        signer: Option<Arc<dyn Signer>>,
        durable: Option<Arc<dyn DurableStore>>,
    ) -> Self {
        let pool = Arc::new(RelayPool::new(config.pool.clone()));
        let source: Arc<dyn EventSource> = pool.clone();
        Self::with_source(config, pool, source, signer, durable)
    }

    /// Build an engine over an explicit pool and fetch source.
    pub fn with_source(
        config: EngineConfig,
        pool: Arc<RelayPool>,
        source: Arc<dyn EventSource>,
        signer: Option<Arc<dyn Signer>>,
        durable: Option<Arc<dyn DurableStore>>,
    ) -> Self {
        let mut batch = config.batch.clone();
        if batch.broad_relays.is_empty() {
            batch.broad_relays = config.broad_relays.clone();
        }
        let objects = ObjectCache::new(batch, source.clone(), durable);
        let selector = RelaySelector::new(objects.clone(), config.broad_relays.clone());

        Self {
            pool,
            source,
            store: Arc::new(TimelineStore::new()),
            objects,
            selector,
            authenticator: Arc::new(Authenticator::new(signer)),
            defaults: config.sub,
        }
    }

    /// The timeline store.
    pub fn timelines(&self) -> &Arc<TimelineStore> {
        &self.store
    }

    /// The object cache.
    pub fn objects(&self) -> &Arc<ObjectCache> {
        &self.objects
    }

    /// The relay pool.
    pub fn pool(&self) -> &Arc<RelayPool> {
        &self.pool
    }

    /// Open a live timeline for a query with the default options.
    pub async fn open_timeline(&self, query: Query) -> FeedHandle {
        self.open_timeline_with(query, self.defaults.clone()).await
    }

    /// Open a live timeline for a query.
    ///
    /// Cached refs for a previously-seen query are delivered immediately as a
    /// partial snapshot, before any relay answers. The network snapshot then
    /// primes (or merges into) the timeline cache, and live events keep both
    /// the cache and the consumer current.
    pub async fn open_timeline_with(&self, query: Query, opts: SubOptions) -> FeedHandle {
        let key = query.key();
        let (out_tx, out_rx) = mpsc::unbounded_channel();

        if let Some(timeline) = self.store.get(&key) {
            let events: Vec<Event> = timeline
                .refs()
                .iter()
                .filter_map(|r| self.objects.cached_event(&r.id))
                .collect();
            if !events.is_empty() {
                debug!("painting timeline {} from cache ({} events)", key, events.len());
                let _ = out_tx.send(FeedUpdate::Snapshot {
                    events,
                    complete: false,
                });
            }
        }

        let (subscription, mut updates) = TimelineSubscription::open(
            self.pool.clone(),
            &query,
            opts,
            self.authenticator.clone(),
        )
        .await;

        let store = self.store.clone();
        let objects = self.objects.clone();
        let forward_key = key.clone();
        let forward_query = query.clone();
        let forward = tokio::spawn(async move {
            while let Some(update) = updates.recv().await {
                match &update {
                    FeedUpdate::Snapshot { events, complete } => {
                        for event in events {
                            objects.insert_event(event.clone());
                        }
                        if *complete {
                            let refs: Vec<EventRef> = events.iter().map(EventRef::of).collect();
                            if !store.prime_from_snapshot(&forward_key, &forward_query, refs.clone())
                            {
                                for r in refs {
                                    store.merge_new_event(&forward_key, r);
                                }
                            }
                        }
                    }
                    FeedUpdate::Live(event) => {
                        objects.insert_event(event.clone());
                        store.merge_new_event(&forward_key, EventRef::of(event));
                    }
                    FeedUpdate::Closed { .. } => {}
                }
                if out_tx.send(update).is_err() {
                    break;
                }
            }
        });

        FeedHandle {
            key,
            query,
            subscription,
            updates: out_rx,
            forward,
        }
    }

    /// Page a timeline backward: up to `limit` events with
    /// `created_at <= until`, oldest page last.
    ///
    /// Served from the cached refs first; only when the cache cannot fill the
    /// page is one bounded query issued against the timeline's original relay
    /// set, and its results grow the cached prefix for the next page.
    pub async fn load_more(&self, key: &QueryKey, until: u64, limit: usize) -> Result<Vec<Event>> {
        let timeline = self.store.get(key).ok_or(ClientError::UnknownTimeline)?;

        let page = |timeline: &Timeline| -> Vec<EventRef> {
            timeline
                .refs()
                .iter()
                .filter(|r| r.created_at <= until)
                .take(limit)
                .cloned()
                .collect()
        };

        let mut refs = page(&timeline);
        if refs.len() < limit {
            let need = limit - refs.len();
            let boundary = timeline
                .oldest()
                .map(|r| r.created_at.min(until))
                .unwrap_or(until);
            debug!(
                "paging timeline {} beyond {} ({} more needed)",
                key, boundary, need
            );

            let filter = timeline
                .query
                .filter
                .clone()
                .until(boundary)
                .limit(need as u64);
            let mut fetched = self
                .source
                .fetch(&timeline.query.relays, vec![filter])
                .await;
            fetched.retain(|e| validate_event(e));
            for event in &fetched {
                self.objects.insert_event(event.clone());
            }

            let older: Vec<EventRef> = fetched.iter().map(EventRef::of).collect();
            self.store.extend_backward(key, older);
            if let Some(timeline) = self.store.get(key) {
                refs = page(&timeline);
            }
        }

        let mut events = Vec::with_capacity(refs.len());
        for r in &refs {
            if let Some(event) = self.objects.lookup(BatchKey::EventId(r.id.clone())).await {
                events.push(event);
            }
        }
        Ok(events)
    }

    /// Publish a signed event. With no explicit relay set, the author's and
    /// tagged users' declared relays are used, falling back to the broad set.
    pub async fn publish(
        &self,
        event: &Event,
        relays: Option<Vec<String>>,
    ) -> Result<PublishConfirmation> {
        let relays = match relays {
            Some(relays) if !relays.is_empty() => relays,
            _ => self.selector.publish_relays(event).await,
        };
        publish_event(&self.pool, &self.authenticator, &relays, event).await
    }

    /// Disconnect every relay.
    pub async fn shutdown(&self) {
        self.pool.disconnect_all().await;
    }
}

/// A live, cancellable feed.
pub struct FeedHandle {
    key: QueryKey,
    query: Query,
    subscription: TimelineSubscription,
    updates: mpsc::UnboundedReceiver<FeedUpdate>,
    forward: tokio::task::JoinHandle<()>,
}

impl FeedHandle {
    /// The cache key of this feed.
    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    /// The query this feed serves.
    pub fn query(&self) -> &Query {
        &self.query
    }

    /// Next update, or `None` after the stream ends.
    pub async fn next(&mut self) -> Option<FeedUpdate> {
        self.updates.recv().await
    }

    /// Whether the feed has been closed.
    pub fn is_closed(&self) -> bool {
        self.subscription.is_closed()
    }

    /// Close the feed. Idempotent; no update is delivered after the first
    /// call returns.
    pub async fn close(&self) {
        self.subscription.close().await;
    }
}

impl Drop for FeedHandle {
    fn drop(&mut self) {
        self.forward.abort();
    }
}
