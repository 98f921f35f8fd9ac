//! Multiplexed timeline subscriptions.
//!
//! One logical query fans out to one raw subscription per relay. Incoming
//! events from all relays are deduplicated by id and merged into a single
//! sorted, limit-truncated snapshot. Completion is quorum-based: the snapshot
//! starts flowing once a majority of relays have exhausted their stored
//! matches, so one slow or dead relay never stalls the feed, and the snapshot
//! is flagged complete exactly once, when every relay has finished.
//!
//! All merge logic lives in [`MergeState`], which is synchronous: events from
//! different relays may arrive in any relative order and possibly out of
//! timestamp order, and every mutation completes without yielding, so the
//! merged view is always internally consistent.

use crate::auth::{AuthTracker, Authenticator};
use crate::connection::SubscriptionUpdate;
use crate::pool::RelayPool;
use crate::query::Query;
use driftline_core::{Event, EventRef, Filter, validate_event};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Generate a unique subscription ID.
pub fn generate_subscription_id() -> String {
    Uuid::new_v4().to_string()[..8].to_string()
}

/// Options for a multiplexed subscription.
#[derive(Debug, Clone)]
pub struct SubOptions {
    /// Size of the merged, truncated snapshot.
    pub limit: usize,
    /// How many relays must finish their stored matches before partial
    /// snapshots start flowing. Defaults to a majority (`ceil(n/2)`): lower
    /// values paint faster but revise the snapshot more; higher values wait
    /// longer for a steadier first result.
    pub quorum: Option<usize>,
}

impl Default for SubOptions {
    fn default() -> Self {
        Self {
            limit: 100,
            quorum: None,
        }
    }
}

/// What one merge step asks the driver to do.
#[derive(Debug, Clone)]
pub enum MergeEffect {
    /// Nothing to report
    None,
    /// The merged snapshot changed
    Snapshot { events: Vec<Event>, complete: bool },
    /// A live event arrived after the snapshot completed
    Live(Event),
}

/// Updates delivered to the consumer of a multiplexed subscription.
#[derive(Debug, Clone)]
pub enum FeedUpdate {
    /// The running merged snapshot; `complete` is true exactly once, when
    /// every relay has finished its stored matches.
    Snapshot { events: Vec<Event>, complete: bool },
    /// An event that arrived after the snapshot completed
    Live(Event),
    /// Terminal state for the whole subscription
    Closed { reason: String },
}

/// Synchronous merge core for one multiplexed subscription.
pub struct MergeState {
    limit: usize,
    quorum: usize,
    total: usize,
    /// Sorted (newest first), limit-truncated window
    refs: Vec<EventRef>,
    /// Bodies for every accepted id
    bodies: HashMap<String, Event>,
    /// Every id ever accepted, including ones truncated out of the window
    seen: HashSet<String>,
    /// Relays that signaled EOSE or closed
    done: HashSet<String>,
    complete_fired: bool,
}

impl MergeState {
    pub fn new(relays: &[String], opts: &SubOptions) -> Self {
        let total = relays.len();
        let quorum = opts.quorum.unwrap_or(total.div_ceil(2)).min(total);
        Self {
            limit: opts.limit,
            quorum,
            total,
            refs: Vec::new(),
            bodies: HashMap::new(),
            seen: HashSet::new(),
            done: HashSet::new(),
            complete_fired: false,
        }
    }

    /// Effect to emit before any relay traffic. An empty relay set is
    /// immediately and fully complete with an empty snapshot.
    pub fn initial_effect(&mut self) -> MergeEffect {
        if self.total == 0 && !self.complete_fired {
            self.complete_fired = true;
            return MergeEffect::Snapshot {
                events: Vec::new(),
                complete: true,
            };
        }
        MergeEffect::None
    }

    /// Merge one event from one relay.
    pub fn on_event(&mut self, event: Event) -> MergeEffect {
        if !self.seen.insert(event.id.clone()) {
            return MergeEffect::None;
        }

        if self.complete_fired {
            // Live phase: forward events landing inside or above the merged
            // window; anything below the window belongs to pagination.
            let r = EventRef::of(&event);
            let in_window = match self.refs.last() {
                Some(oldest) => r < *oldest,
                None => true,
            };
            return if in_window {
                MergeEffect::Live(event)
            } else {
                MergeEffect::None
            };
        }

        let r = EventRef::of(&event);
        if self.refs.len() >= self.limit
            && let Some(oldest) = self.refs.last()
            && r > *oldest
        {
            // Window is full and the event is older than everything in it.
            return MergeEffect::None;
        }

        let pos = self.refs.binary_search(&r).unwrap_or_else(|p| p);
        self.refs.insert(pos, r);
        self.refs.truncate(self.limit);
        self.bodies.insert(event.id.clone(), event);

        if self.done.len() >= self.quorum {
            MergeEffect::Snapshot {
                events: self.snapshot_events(),
                complete: false,
            }
        } else {
            MergeEffect::None
        }
    }

    /// A relay finished its stored matches (EOSE) or terminally closed;
    /// both count toward quorum. Idempotent per relay.
    pub fn on_end(&mut self, relay: &str) -> MergeEffect {
        if self.complete_fired || !self.done.insert(relay.to_string()) {
            return MergeEffect::None;
        }

        let done = self.done.len();
        if done >= self.total {
            self.complete_fired = true;
            MergeEffect::Snapshot {
                events: self.snapshot_events(),
                complete: true,
            }
        } else if done >= self.quorum {
            MergeEffect::Snapshot {
                events: self.snapshot_events(),
                complete: false,
            }
        } else {
            MergeEffect::None
        }
    }

    /// The current merged window, in timeline order.
    pub fn snapshot_events(&self) -> Vec<Event> {
        self.refs
            .iter()
            .filter_map(|r| self.bodies.get(&r.id))
            .cloned()
            .collect()
    }

    /// Whether the fully-complete snapshot has been emitted.
    pub fn is_complete(&self) -> bool {
        self.complete_fired
    }

    /// Number of relays that have finished.
    pub fn done_count(&self) -> usize {
        self.done.len()
    }
}

/// Handle for one multiplexed subscription.
///
/// Closing is idempotent and suppresses every callback scheduled but not yet
/// delivered: the closed flag is checked at emission time.
pub struct TimelineSubscription {
    id: String,
    relays: Vec<String>,
    closed: Arc<AtomicBool>,
    tasks: Vec<tokio::task::JoinHandle<()>>,
    pool: Option<Arc<RelayPool>>,
    out_tx: mpsc::UnboundedSender<FeedUpdate>,
}

impl TimelineSubscription {
    /// Open one raw subscription per relay in the query's set and start
    /// merging. Returns the handle and the update stream.
    pub async fn open(
        pool: Arc<RelayPool>,
        query: &Query,
        opts: SubOptions,
        authenticator: Arc<Authenticator>,
    ) -> (Self, mpsc::UnboundedReceiver<FeedUpdate>) {
        let id = generate_subscription_id();
        let filters = vec![query.filter.clone()];

        // Dial every relay concurrently: one slow connect must not delay the
        // others' stored results.
        let streams =
            futures::future::join_all(query.relays.iter().map(|url| {
                let filters = filters.clone();
                let pool = &pool;
                let id = &id;
                async move { (url.clone(), pool.subscribe(url, id, filters).await) }
            }))
            .await;

        debug!(
            "opened subscription {} against {} relays",
            id,
            streams.len()
        );
        Self::from_streams(
            id,
            streams,
            opts,
            Some(pool),
            Some(AuthContext {
                filters,
                authenticator,
            }),
        )
    }

    /// Build a subscription over already-open per-relay update streams.
    fn from_streams(
        id: String,
        streams: Vec<(String, mpsc::UnboundedReceiver<SubscriptionUpdate>)>,
        opts: SubOptions,
        pool: Option<Arc<RelayPool>>,
        auth: Option<AuthContext>,
    ) -> (Self, mpsc::UnboundedReceiver<FeedUpdate>) {
        let relays: Vec<String> = streams.iter().map(|(url, _)| url.clone()).collect();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));

        let mut state = MergeState::new(&relays, &opts);
        match state.initial_effect() {
            MergeEffect::Snapshot { events, complete } => {
                let _ = out_tx.send(FeedUpdate::Snapshot { events, complete });
            }
            _ => {}
        }
        let state = Arc::new(Mutex::new(state));

        let tracker = Arc::new(AuthTracker::new());
        let active = Arc::new(AtomicUsize::new(relays.len()));
        let auth = auth.map(Arc::new);

        let mut tasks = Vec::with_capacity(relays.len());
        for (url, rx) in streams {
            let driver = RelayDriver {
                url,
                sub_id: id.clone(),
                state: Arc::clone(&state),
                closed: Arc::clone(&closed),
                out_tx: out_tx.clone(),
                tracker: Arc::clone(&tracker),
                pool: pool.clone(),
                auth: auth.clone(),
                active: Arc::clone(&active),
            };
            tasks.push(tokio::spawn(driver.run(rx)));
        }

        (
            Self {
                id,
                relays,
                closed,
                tasks,
                pool,
                out_tx,
            },
            out_rx,
        )
    }

    /// Subscription id shared by every per-relay subscription.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether the subscription has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Tear down every per-relay subscription. Idempotent; after the first
    /// call no further update is delivered.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.out_tx.send(FeedUpdate::Closed {
            reason: "closed by caller".to_string(),
        });
        for task in &self.tasks {
            task.abort();
        }
        if let Some(pool) = &self.pool {
            for url in &self.relays {
                pool.unsubscribe(url, &self.id).await;
            }
        }
        debug!("closed subscription {}", self.id);
    }
}

impl Drop for TimelineSubscription {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Everything the drivers need to answer auth challenges.
struct AuthContext {
    filters: Vec<Filter>,
    authenticator: Arc<Authenticator>,
}

/// Consumes one relay's update stream and feeds the shared merge state.
struct RelayDriver {
    url: String,
    sub_id: String,
    state: Arc<Mutex<MergeState>>,
    closed: Arc<AtomicBool>,
    out_tx: mpsc::UnboundedSender<FeedUpdate>,
    tracker: Arc<AuthTracker>,
    pool: Option<Arc<RelayPool>>,
    auth: Option<Arc<AuthContext>>,
    active: Arc<AtomicUsize>,
}

impl RelayDriver {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<SubscriptionUpdate>) {
        while let Some(update) = rx.recv().await {
            if self.closed.load(Ordering::SeqCst) {
                break;
            }
            match update {
                SubscriptionUpdate::Event(event) => {
                    if !validate_event(&event) {
                        warn!("dropping malformed event from {}", self.url);
                        continue;
                    }
                    let effect = self.state.lock().unwrap().on_event(event);
                    self.emit(effect);
                }
                SubscriptionUpdate::Eose => {
                    let effect = self.state.lock().unwrap().on_end(&self.url);
                    self.emit(effect);
                }
                SubscriptionUpdate::AuthRequired(challenge) => {
                    self.handle_auth(&challenge).await;
                }
                SubscriptionUpdate::Closed(reason) => {
                    debug!(
                        "subscription {} closed by {}: {}",
                        self.sub_id, self.url, reason
                    );
                    let effect = self.state.lock().unwrap().on_end(&self.url);
                    self.emit(effect);
                    break;
                }
            }
        }

        // Stream ended; make sure this relay counts as finished.
        let effect = self.state.lock().unwrap().on_end(&self.url);
        self.emit(effect);

        if self.active.fetch_sub(1, Ordering::SeqCst) == 1
            && !self.closed.load(Ordering::SeqCst)
        {
            let _ = self.out_tx.send(FeedUpdate::Closed {
                reason: "all relays closed".to_string(),
            });
        }
    }

    /// One handshake per relay per subscription; anything else is terminal
    /// for that relay only.
    async fn handle_auth(&self, challenge: &str) {
        if let (Some(auth), Some(pool)) = (&self.auth, &self.pool)
            && auth.authenticator.can_authenticate()
            && self.tracker.begin(&self.url)
        {
            let ok = match pool.ensure(&self.url).await {
                Ok(conn) => auth.authenticator.respond(&conn, challenge).await.is_ok(),
                Err(_) => false,
            };
            self.tracker.finish(&self.url, ok);
            if ok
                && pool
                    .resubscribe(&self.url, &self.sub_id, auth.filters.clone())
                    .await
                    .is_ok()
            {
                debug!("resumed subscription {} on {}", self.sub_id, self.url);
                return;
            }
            warn!("authentication with {} failed", self.url);
        }

        let effect = self.state.lock().unwrap().on_end(&self.url);
        self.emit(effect);
    }

    fn emit(&self, effect: MergeEffect) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let update = match effect {
            MergeEffect::None => return,
            MergeEffect::Snapshot { events, complete } => {
                FeedUpdate::Snapshot { events, complete }
            }
            MergeEffect::Live(event) => FeedUpdate::Live(event),
        };
        let _ = self.out_tx.send(update);
    }
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
            kind: 1,
            tags: vec![],
            content: format!("event {}", seed),
            sig: hex_id(0xbb).repeat(2),
        }
    }

    fn urls(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("wss://relay{}.example.com", i)).collect()
    }

    fn opts(limit: usize) -> SubOptions {
        SubOptions {
            limit,
            quorum: None,
        }
    }

    #[test]
    fn test_generate_subscription_id() {
        let a = generate_subscription_id();
        let b = generate_subscription_id();
        assert_eq!(a.len(), 8);
        assert_ne!(a, b);
    }

    #[test]
    fn test_two_relay_merge_scenario() {
        // A returns [e5, e3, e1] then EOSE; B returns [e4, e2] then EOSE.
        // With limit 3 the merged snapshot is [e5, e4, e3], complete.
        let relays = urls(2);
        let mut state = MergeState::new(&relays, &opts(3));

        for (seed, stamp) in [(5u8, 50u64), (3, 30), (1, 10)] {
            state.on_event(test_event(seed, stamp));
        }
        // First EOSE crosses the majority threshold: partial snapshot.
        match state.on_end(&relays[0]) {
            MergeEffect::Snapshot { events, complete } => {
                assert!(!complete);
                let stamps: Vec<u64> = events.iter().map(|e| e.created_at).collect();
                assert_eq!(stamps, vec![50, 30, 10]);
            }
            other => panic!("unexpected effect: {:?}", other),
        }

        // B's events arrive after A finished; they still merge.
        match state.on_event(test_event(4, 40)) {
            MergeEffect::Snapshot { events, complete } => {
                assert!(!complete);
                let stamps: Vec<u64> = events.iter().map(|e| e.created_at).collect();
                assert_eq!(stamps, vec![50, 40, 30]);
            }
            other => panic!("unexpected effect: {:?}", other),
        }
        // e2 is older than the full window: ignored.
        assert!(matches!(state.on_event(test_event(2, 20)), MergeEffect::None));

        match state.on_end(&relays[1]) {
            MergeEffect::Snapshot { events, complete } => {
                assert!(complete);
                let stamps: Vec<u64> = events.iter().map(|e| e.created_at).collect();
                assert_eq!(stamps, vec![50, 40, 30]);
            }
            other => panic!("unexpected effect: {:?}", other),
        }
        assert!(state.is_complete());
    }

    #[test]
    fn test_merge_is_interleaving_independent() {
        let relays = urls(3);
        let deliveries: Vec<(usize, u8, u64)> = vec![
            (0, 1, 10),
            (1, 2, 20),
            (2, 3, 30),
            (0, 4, 40),
            (1, 5, 50),
        ];

        // Deliver in several different relative orders; the final snapshot
        // must be identical.
        let orders: Vec<Vec<usize>> = vec![
            vec![0, 1, 2, 3, 4],
            vec![4, 3, 2, 1, 0],
            vec![2, 0, 4, 1, 3],
        ];

        let mut snapshots = Vec::new();
        for order in orders {
            let mut state = MergeState::new(&relays, &opts(10));
            for idx in order {
                let (_, seed, stamp) = deliveries[idx];
                state.on_event(test_event(seed, stamp));
            }
            for url in &relays {
                state.on_end(url);
            }
            let ids: Vec<String> =
                state.snapshot_events().iter().map(|e| e.id.clone()).collect();
            snapshots.push(ids);
        }
        assert_eq!(snapshots[0], snapshots[1]);
        assert_eq!(snapshots[1], snapshots[2]);

        // And sorted newest-first without duplicates.
        let mut state = MergeState::new(&relays, &opts(10));
        for (_, seed, stamp) in &deliveries {
            state.on_event(test_event(*seed, *stamp));
            state.on_event(test_event(*seed, *stamp)); // duplicate delivery
        }
        let events = state.snapshot_events();
        assert_eq!(events.len(), deliveries.len());
        let stamps: Vec<u64> = events.iter().map(|e| e.created_at).collect();
        assert_eq!(stamps, vec![50, 40, 30, 20, 10]);
    }

    #[test]
    fn test_quorum_thresholds() {
        let relays = urls(3); // quorum = 2
        let mut state = MergeState::new(&relays, &opts(10));

        state.on_event(test_event(1, 10));
        assert!(matches!(state.on_end(&relays[0]), MergeEffect::None));
        assert_eq!(state.done_count(), 1);

        // Second EOSE reaches the majority: partial snapshot.
        match state.on_end(&relays[1]) {
            MergeEffect::Snapshot { complete, .. } => assert!(!complete),
            other => panic!("unexpected effect: {:?}", other),
        }

        // Duplicate EOSE from the same relay does nothing.
        assert!(matches!(state.on_end(&relays[1]), MergeEffect::None));

        match state.on_end(&relays[2]) {
            MergeEffect::Snapshot { complete, .. } => assert!(complete),
            other => panic!("unexpected effect: {:?}", other),
        }
        // Completion is reported exactly once.
        assert!(matches!(state.on_end(&relays[2]), MergeEffect::None));
    }

    #[test]
    fn test_single_relay_quorum() {
        let relays = urls(1); // quorum = 1
        let mut state = MergeState::new(&relays, &opts(10));
        state.on_event(test_event(1, 10));
        match state.on_end(&relays[0]) {
            MergeEffect::Snapshot { complete, .. } => assert!(complete),
            other => panic!("unexpected effect: {:?}", other),
        }
    }

    #[test]
    fn test_empty_relay_set_completes_immediately() {
        let mut state = MergeState::new(&[], &opts(10));
        match state.initial_effect() {
            MergeEffect::Snapshot { events, complete } => {
                assert!(events.is_empty());
                assert!(complete);
            }
            other => panic!("unexpected effect: {:?}", other),
        }
        // Only once.
        assert!(matches!(state.initial_effect(), MergeEffect::None));
    }

    #[test]
    fn test_custom_quorum() {
        let relays = urls(4);
        let mut state = MergeState::new(
            &relays,
            &SubOptions {
                limit: 10,
                quorum: Some(1),
            },
        );
        match state.on_end(&relays[0]) {
            MergeEffect::Snapshot { complete, .. } => assert!(!complete),
            other => panic!("unexpected effect: {:?}", other),
        }
    }

    #[test]
    fn test_live_events_after_completion() {
        let relays = urls(1);
        let mut state = MergeState::new(&relays, &opts(10));
        state.on_event(test_event(1, 10));
        state.on_end(&relays[0]);
        assert!(state.is_complete());

        // A fresh, newer event is live.
        match state.on_event(test_event(2, 20)) {
            MergeEffect::Live(event) => assert_eq!(event.created_at, 20),
            other => panic!("unexpected effect: {:?}", other),
        }

        // Re-delivery of a known event is dropped.
        assert!(matches!(state.on_event(test_event(1, 10)), MergeEffect::None));

        // An event older than everything in the window belongs to pagination.
        assert!(matches!(state.on_event(test_event(3, 5)), MergeEffect::None));
    }

    #[tokio::test]
    async fn test_driver_merges_streams_end_to_end() {
        let (tx_a, rx_a) = mpsc::unbounded_channel();
        let (tx_b, rx_b) = mpsc::unbounded_channel();
        let streams = vec![
            ("wss://a.example.com".to_string(), rx_a),
            ("wss://b.example.com".to_string(), rx_b),
        ];
        let (sub, mut updates) =
            TimelineSubscription::from_streams(generate_subscription_id(), streams, opts(3), None, None);

        for (seed, stamp) in [(5u8, 50u64), (3, 30), (1, 10)] {
            tx_a.send(SubscriptionUpdate::Event(test_event(seed, stamp)))
                .unwrap();
        }
        tx_a.send(SubscriptionUpdate::Eose).unwrap();
        for (seed, stamp) in [(4u8, 40u64), (2, 20)] {
            tx_b.send(SubscriptionUpdate::Event(test_event(seed, stamp)))
                .unwrap();
        }
        tx_b.send(SubscriptionUpdate::Eose).unwrap();

        // Drain updates until the complete snapshot arrives.
        let mut complete_snapshot = None;
        while let Some(update) = updates.recv().await {
            if let FeedUpdate::Snapshot { events, complete } = update
                && complete
            {
                complete_snapshot = Some(events);
                break;
            }
        }
        let events = complete_snapshot.expect("complete snapshot");
        let stamps: Vec<u64> = events.iter().map(|e| e.created_at).collect();
        assert_eq!(stamps, vec![50, 40, 30]);

        // Live event after completion.
        tx_a.send(SubscriptionUpdate::Event(test_event(6, 60)))
            .unwrap();
        match updates.recv().await {
            Some(FeedUpdate::Live(event)) => assert_eq!(event.created_at, 60),
            other => panic!("unexpected update: {:?}", other),
        }

        sub.close().await;
        assert!(sub.is_closed());
        sub.close().await; // idempotent
    }

    #[tokio::test]
    async fn test_driver_counts_closed_relay_toward_quorum() {
        let (tx_a, rx_a) = mpsc::unbounded_channel();
        let (tx_b, rx_b) = mpsc::unbounded_channel();
        let streams = vec![
            ("wss://a.example.com".to_string(), rx_a),
            ("wss://b.example.com".to_string(), rx_b),
        ];
        let (_sub, mut updates) =
            TimelineSubscription::from_streams(generate_subscription_id(), streams, opts(10), None, None);

        tx_a.send(SubscriptionUpdate::Event(test_event(1, 10)))
            .unwrap();
        tx_a.send(SubscriptionUpdate::Eose).unwrap();
        tx_b.send(SubscriptionUpdate::Closed("error: shutting down".to_string()))
            .unwrap();

        let mut complete = false;
        while let Some(update) = updates.recv().await {
            match update {
                FeedUpdate::Snapshot { complete: c, .. } if c => {
                    complete = true;
                    break;
                }
                _ => {}
            }
        }
        assert!(complete);
    }

    #[tokio::test]
    async fn test_driver_auth_required_without_signer_is_terminal_for_relay() {
        let (tx_a, rx_a) = mpsc::unbounded_channel();
        let streams = vec![("wss://a.example.com".to_string(), rx_a)];
        let (_sub, mut updates) =
            TimelineSubscription::from_streams(generate_subscription_id(), streams, opts(10), None, None);

        tx_a.send(SubscriptionUpdate::AuthRequired("challenge".to_string()))
            .unwrap();

        // With no way to authenticate, the single relay counts as done and
        // the subscription completes empty.
        let mut complete = false;
        while let Some(update) = updates.recv().await {
            if let FeedUpdate::Snapshot { events, complete: c } = update
                && c
            {
                assert!(events.is_empty());
                complete = true;
                break;
            }
        }
        assert!(complete);
    }

    #[tokio::test]
    async fn test_no_updates_after_close() {
        let (tx_a, rx_a) = mpsc::unbounded_channel();
        let streams = vec![("wss://a.example.com".to_string(), rx_a)];
        let (sub, mut updates) =
            TimelineSubscription::from_streams(generate_subscription_id(), streams, opts(10), None, None);

        sub.close().await;
        match updates.recv().await {
            Some(FeedUpdate::Closed { .. }) => {}
            other => panic!("unexpected update: {:?}", other),
        }

        // Traffic delivered after close must not surface. Dropping the
        // handle releases its update sender, so the stream simply ends.
        let _ = tx_a.send(SubscriptionUpdate::Event(test_event(1, 10)));
        let _ = tx_a.send(SubscriptionUpdate::Eose);
        drop(tx_a);
        drop(sub);
        assert!(updates.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_all_streams_ending_reports_closed() {
        let (tx_a, rx_a) = mpsc::unbounded_channel();
        let streams = vec![("wss://a.example.com".to_string(), rx_a)];
        let (_sub, mut updates) =
            TimelineSubscription::from_streams(generate_subscription_id(), streams, opts(10), None, None);

        tx_a.send(SubscriptionUpdate::Eose).unwrap();
        drop(tx_a);

        let mut saw_complete = false;
        let mut saw_closed = false;
        while let Some(update) = updates.recv().await {
            match update {
                FeedUpdate::Snapshot { complete, .. } => saw_complete |= complete,
                FeedUpdate::Closed { reason } => {
                    assert_eq!(reason, "all relays closed");
                    saw_closed = true;
                    break;
                }
                _ => {}
            }
        }
        assert!(saw_complete);
        assert!(saw_closed);
    }
}
