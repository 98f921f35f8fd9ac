//! External capability traits.
//!
//! The engine never holds key material and never writes to disk itself. Both
//! concerns are injected: a [`Signer`] turns drafts into signed events (for
//! publishing and for auth challenges), and a [`DurableStore`] persists
//! long-lived replaceable objects (profiles, relay lists, follow lists)
//! across runs.

use crate::error::Result;
use async_trait::async_trait;
use driftline_core::{Event, EventTemplate};

/// Produces signed events from drafts.
#[async_trait]
pub trait Signer: Send + Sync {
    /// Sign a draft, filling in the author pubkey, id and signature.
    async fn sign_event(&self, template: EventTemplate) -> Result<Event>;
}

/// Durable storage for replaceable objects, keyed by (owner, kind).
///
/// Consulted only for long-lived object kinds, never for arbitrary timeline
/// events.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Fetch the stored object for an owner and kind, if any.
    async fn get(&self, owner: &str, kind: u16) -> Option<Event>;

    /// Store (or replace) an object.
    async fn put(&self, event: &Event);
}
