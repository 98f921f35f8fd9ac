//! Relay pool: one logical connection per relay URL.
//!
//! Connections are created lazily, reused across all subscriptions, and never
//! force-closed on a failed request; a relay that cannot be reached degrades
//! to an already-completed, empty subscription so multi-relay quorum math is
//! never stalled by one dead relay.

use crate::connection::{
    ConnectionConfig, PublishConfirmation, RelayConnection, SubscriptionUpdate,
};
use crate::error::Result;
use crate::multiplex::generate_subscription_id;
use async_trait::async_trait;
use driftline_core::{Event, Filter, validate_event};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, warn};

/// Pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Per-connection configuration
    pub connection: ConnectionConfig,
    /// How long a one-shot request waits for a relay to finish its stored
    /// matches before giving up on it
    pub request_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            request_timeout: Duration::from_secs(20),
        }
    }
}

/// Anything that can fetch events from a set of relays.
///
/// The seam between the cache layers and the network: the pool implements it
/// over real sockets, tests implement it over canned data.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Fetch the deduplicated union of all matches across the relay set.
    /// Per-relay failures are absorbed; a total failure is an empty result.
    async fn fetch(&self, relays: &[String], filters: Vec<Filter>) -> Vec<Event>;
}

/// A pool of relay connections.
pub struct RelayPool {
    /// Connections indexed by URL
    connections: RwLock<HashMap<String, Arc<RelayConnection>>>,
    /// Configuration
    config: PoolConfig,
}

impl RelayPool {
    /// Create a new relay pool.
    pub fn new(config: PoolConfig) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Get or create the connection for a URL and make sure it is connected.
    ///
    /// Idempotent: an existing live connection is returned as-is; a dead one
    /// is re-dialed (subject to its backoff schedule).
    pub async fn ensure(&self, url: &str) -> Result<Arc<RelayConnection>> {
        let existing = self.connections.read().await.get(url).cloned();
        let conn = match existing {
            Some(conn) => conn,
            None => {
                let conn = Arc::new(RelayConnection::new(url, self.config.connection.clone())?);
                let mut map = self.connections.write().await;
                map.entry(url.to_string()).or_insert(conn).clone()
            }
        };

        if !conn.is_connected().await {
            conn.connect().await?;
        }
        Ok(conn)
    }

    /// The connection for a URL, if one has been created.
    pub async fn connection(&self, url: &str) -> Option<Arc<RelayConnection>> {
        self.connections.read().await.get(url).cloned()
    }

    /// All relay URLs the pool has connections for.
    pub async fn urls(&self) -> Vec<String> {
        self.connections.read().await.keys().cloned().collect()
    }

    /// Number of currently connected relays.
    pub async fn connected_count(&self) -> usize {
        let conns = self.connections.read().await;
        let mut count = 0;
        for conn in conns.values() {
            if conn.is_connected().await {
                count += 1;
            }
        }
        count
    }

    /// Open a subscription against one relay.
    ///
    /// An unreachable relay yields a stream that immediately reports EOSE and
    /// close, never an error: for quorum purposes it is a relay with nothing
    /// stored.
    pub async fn subscribe(
        &self,
        url: &str,
        subscription_id: &str,
        filters: Vec<Filter>,
    ) -> mpsc::UnboundedReceiver<SubscriptionUpdate> {
        match self.ensure(url).await {
            Ok(conn) => match conn.subscribe(subscription_id, filters).await {
                Ok(rx) => rx,
                Err(e) => {
                    warn!("subscribe on {} failed: {}", url, e);
                    completed_empty("subscribe failed")
                }
            },
            Err(e) => {
                debug!("relay {} unavailable: {}", url, e);
                completed_empty("unreachable")
            }
        }
    }

    /// Re-issue an existing subscription's REQ (after authentication).
    pub async fn resubscribe(
        &self,
        url: &str,
        subscription_id: &str,
        filters: Vec<Filter>,
    ) -> Result<()> {
        let conn = self.ensure(url).await?;
        conn.resubscribe(subscription_id, filters).await
    }

    /// Close a subscription on one relay.
    pub async fn unsubscribe(&self, url: &str, subscription_id: &str) {
        if let Some(conn) = self.connection(url).await {
            let _ = conn.unsubscribe(subscription_id).await;
        }
    }

    /// Publish an event to one relay and await its acknowledgment.
    pub async fn publish(&self, url: &str, event: &Event) -> Result<PublishConfirmation> {
        let conn = self.ensure(url).await?;
        conn.publish(event).await
    }

    /// One-shot request: collect matches from one relay until it signals the
    /// end of its stored data, it closes the subscription, or the request
    /// timeout elapses. Malformed events are dropped one at a time.
    pub async fn request(&self, url: &str, filters: Vec<Filter>) -> Result<Vec<Event>> {
        let conn = self.ensure(url).await?;
        let id = generate_subscription_id();
        let mut rx = conn.subscribe(&id, filters).await?;

        let deadline = tokio::time::Instant::now() + self.config.request_timeout;
        let mut events = Vec::new();
        loop {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(SubscriptionUpdate::Event(event))) => {
                    if validate_event(&event) {
                        events.push(event);
                    } else {
                        warn!("dropping malformed event from {}", url);
                    }
                }
                Ok(Some(_)) | Ok(None) => break,
                Err(_) => {
                    debug!("request timed out against {}", url);
                    break;
                }
            }
        }

        let _ = conn.unsubscribe(&id).await;
        Ok(events)
    }

    /// Fan a one-shot request across a relay set and merge the results,
    /// deduplicated by event id. Per-relay failures are absorbed.
    pub async fn request_many(&self, relays: &[String], filters: Vec<Filter>) -> Vec<Event> {
        let tasks = relays.iter().map(|url| {
            let filters = filters.clone();
            async move { (url.clone(), self.request(url, filters).await) }
        });
        let results = futures::future::join_all(tasks).await;

        let mut seen = HashSet::new();
        let mut events = Vec::new();
        for (url, result) in results {
            match result {
                Ok(batch) => {
                    for event in batch {
                        if seen.insert(event.id.clone()) {
                            events.push(event);
                        }
                    }
                }
                Err(e) => debug!("request to {} failed: {}", url, e),
            }
        }
        events
    }

    /// Disconnect every relay.
    pub async fn disconnect_all(&self) {
        let conns = self.connections.read().await;
        for conn in conns.values() {
            conn.disconnect().await;
        }
    }
}

impl Default for RelayPool {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}

#[async_trait]
impl EventSource for RelayPool {
    async fn fetch(&self, relays: &[String], filters: Vec<Filter>) -> Vec<Event> {
        self.request_many(relays, filters).await
    }
}

/// A subscription stream for a relay that was never reached: end-of-stored
/// and close are already in the channel.
fn completed_empty(reason: &str) -> mpsc::UnboundedReceiver<SubscriptionUpdate> {
    let (tx, rx) = mpsc::unbounded_channel();
    let _ = tx.send(SubscriptionUpdate::Eose);
    let _ = tx.send(SubscriptionUpdate::Closed(reason.to_string()));
    rx
}
