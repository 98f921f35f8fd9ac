//! Multi-relay timeline synchronization and caching engine.
//!
//! This crate aggregates the append-only event logs of many independent,
//! unreliable relays into coherent, incrementally-updatable timelines:
//! - One lazily-established connection per relay, reused by every query
//! - Per-relay subscriptions merged into a single deduplicated, sorted,
//!   quorum-completed snapshot with live updates
//! - A timeline cache that answers re-opened feeds and pagination without
//!   re-querying relays
//! - A batching object cache that collapses concurrent lookups of the same
//!   object into one query
//! - Authentication handshakes and publish fan-out that tolerate individual
//!   relay failures
//!
//! # Example
//!
//! ```rust,no_run
//! use driftline_client::{EngineConfig, FeedEngine, FeedUpdate, Query};
//! use driftline_core::Filter;
//!
//! #[tokio::main]
//! async fn main() {
//!     let engine = FeedEngine::new(EngineConfig::default(), None, None);
//!
//!     let query = Query::new(
//!         Filter::new().kinds(vec![1]).limit(50),
//!         vec![
//!             "wss://relay.damus.io".to_string(),
//!             "wss://nos.lol".to_string(),
//!         ],
//!     );
//!
//!     let mut feed = engine.open_timeline(query).await;
//!     while let Some(update) = feed.next().await {
//!         match update {
//!             FeedUpdate::Snapshot { events, complete } => {
//!                 println!("{} events (complete: {})", events.len(), complete);
//!             }
//!             FeedUpdate::Live(event) => println!("live: {}", event.id),
//!             FeedUpdate::Closed { reason } => {
//!                 println!("feed closed: {}", reason);
//!                 break;
//!             }
//!         }
//!     }
//! }
//! ```

mod auth;
mod batch;
mod connection;
mod engine;
mod error;
mod message;
mod multiplex;
mod pool;
mod publish;
mod query;
mod relay_selection;
mod signer;
mod timeline;

pub use auth::{AUTH_REQUIRED_PREFIX, AuthState, AuthTracker, Authenticator, auth_required_reason, challenge_template};
pub use batch::{BatchConfig, BatchKey, ObjectCache};
pub use connection::{
    ConnectionConfig, ConnectionState, PublishConfirmation, RelayConnection, SubscriptionUpdate,
};
pub use engine::{EngineConfig, FeedEngine, FeedHandle};
pub use error::{ClientError, Result};
pub use message::{ClientMessage, MessageError, RelayMessage};
pub use multiplex::{
    FeedUpdate, MergeEffect, MergeState, SubOptions, TimelineSubscription,
    generate_subscription_id,
};
pub use pool::{EventSource, PoolConfig, RelayPool};
pub use publish::publish_event;
pub use query::{Query, QueryKey};
pub use relay_selection::RelaySelector;
pub use signer::{DurableStore, Signer};
pub use timeline::{Timeline, TimelineStore};

/// Broad relays queried when nothing more specific is known.
pub const DEFAULT_BROAD_RELAYS: &[&str] = &[
    "wss://relay.damus.io",
    "wss://nos.lol",
    "wss://relay.nostr.band",
];

/// The default broad relay set as owned strings.
pub fn default_broad_relays() -> Vec<String> {
    DEFAULT_BROAD_RELAYS.iter().map(|s| s.to_string()).collect()
}
