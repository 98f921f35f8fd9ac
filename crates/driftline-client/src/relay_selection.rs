//! Relay selection from declared relay lists.
//!
//! Events are downloaded from their author's write relays and mentions are
//! delivered to the tagged users' read relays. Both sides resolve through the
//! object cache; users without a declared list fall back to the configured
//! broad relays.

use crate::batch::{BatchKey, ObjectCache};
use driftline_core::{Event, RelayList};
use std::sync::Arc;

/// Picks relays for reads and publishes based on declared relay lists.
pub struct RelaySelector {
    objects: Arc<ObjectCache>,
    fallback: Vec<String>,
}

impl RelaySelector {
    pub fn new(objects: Arc<ObjectCache>, fallback: Vec<String>) -> Self {
        Self { objects, fallback }
    }

    /// The declared relay list of a pubkey, if one can be resolved.
    async fn declared(&self, pubkey: &str) -> Option<RelayList> {
        self.objects
            .lookup(BatchKey::RelayList(pubkey.to_string()))
            .await
            .and_then(|e| RelayList::from_event(&e).ok())
    }

    /// Relays a user writes to (where their events are fetched from).
    pub async fn write_relays(&self, pubkey: &str) -> Vec<String> {
        match self.declared(pubkey).await {
            Some(list) => {
                let relays = list.write_relays();
                if relays.is_empty() {
                    self.fallback.clone()
                } else {
                    relays
                }
            }
            None => self.fallback.clone(),
        }
    }

    /// Relays a user reads from (where mentions of them are delivered).
    pub async fn read_relays(&self, pubkey: &str) -> Vec<String> {
        match self.declared(pubkey).await {
            Some(list) => {
                let relays = list.read_relays();
                if relays.is_empty() {
                    self.fallback.clone()
                } else {
                    relays
                }
            }
            None => self.fallback.clone(),
        }
    }

    /// Relays to publish an event to: the author's write relays plus the
    /// read relays of every tagged user, deduplicated.
    pub async fn publish_relays(&self, event: &Event) -> Vec<String> {
        let mut relays = self.write_relays(&event.pubkey).await;

        let tagged: Vec<String> = event.tag_values("p").map(str::to_string).collect();
        for pubkey in &tagged {
            relays.extend(self.read_relays(pubkey).await);
        }

        relays.sort();
        relays.dedup();
        if relays.is_empty() {
            self.fallback.clone()
        } else {
            relays
        }
    }
}
