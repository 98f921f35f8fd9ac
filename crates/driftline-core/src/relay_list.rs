//! Declared relay lists (kind 10002).
//!
//! A replaceable event advertising the relays an author writes to and reads
//! from. The engine uses write relays as the second-chance lookup target for
//! an author's objects, and read relays when selecting where to publish
//! mentions of them.

use crate::event::{Event, KIND_RELAY_LIST};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Tag name for relay entries
pub const RELAY_TAG: &str = "r";

/// Errors that can occur parsing relay lists.
#[derive(Debug, Error)]
pub enum RelayListError {
    #[error("event is not a relay list (kind {0})")]
    InvalidKind(u16),
}

/// Marker indicating how an author uses a relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayMarker {
    /// Relay is used for reading
    Read,
    /// Relay is used for writing
    Write,
    /// Relay is used for both (the default when no marker is present)
    ReadWrite,
}

impl RelayMarker {
    /// Whether the relay serves reads.
    pub fn can_read(&self) -> bool {
        matches!(self, RelayMarker::Read | RelayMarker::ReadWrite)
    }

    /// Whether the relay serves writes.
    pub fn can_write(&self) -> bool {
        matches!(self, RelayMarker::Write | RelayMarker::ReadWrite)
    }
}

impl std::str::FromStr for RelayMarker {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "read" => RelayMarker::Read,
            "write" => RelayMarker::Write,
            _ => RelayMarker::ReadWrite,
        })
    }
}

/// A relay entry in a relay list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayEntry {
    /// Relay URL (ws:// or wss://)
    pub url: String,
    /// Read/write capability
    pub marker: RelayMarker,
}

/// A parsed relay list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayList {
    /// Author of the list
    pub author: String,
    /// Timestamp of the list event
    pub created_at: u64,
    /// Declared relays, in tag order
    pub entries: Vec<RelayEntry>,
}

impl RelayList {
    /// Parse a relay list from a kind-10002 event.
    pub fn from_event(event: &Event) -> Result<Self, RelayListError> {
        if event.kind != KIND_RELAY_LIST {
            return Err(RelayListError::InvalidKind(event.kind));
        }

        let entries = event
            .tags
            .iter()
            .filter(|t| t.len() >= 2 && t[0] == RELAY_TAG && !t[1].is_empty())
            .map(|t| RelayEntry {
                url: t[1].clone(),
                marker: t
                    .get(2)
                    .map(|m| m.parse().unwrap_or(RelayMarker::ReadWrite))
                    .unwrap_or(RelayMarker::ReadWrite),
            })
            .collect();

        Ok(Self {
            author: event.pubkey.clone(),
            created_at: event.created_at,
            entries,
        })
    }

    /// Relays the author reads from.
    pub fn read_relays(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.marker.can_read())
            .map(|e| e.url.clone())
            .collect()
    }

    /// Relays the author writes to.
    pub fn write_relays(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.marker.can_write())
            .map(|e| e.url.clone())
            .collect()
    }
}
