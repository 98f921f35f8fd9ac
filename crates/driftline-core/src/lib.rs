//! Protocol value types for the driftline timeline engine.
//!
//! This crate provides:
//! - The signed event structure, unsigned templates, and structural validation
//! - Lightweight event references with timeline ordering
//! - Subscription filters with canonical normalization
//! - Typed views over the long-lived replaceable kinds the engine caches
//!   (profile metadata, follow lists, relay lists)
//!
//! No cryptography lives here: event signing and challenge signing are the
//! job of an external signer capability, so this crate stays free of key
//! material and I/O.

mod event;
mod filter;
mod follows;
mod profile;
mod relay_list;

pub use event::{
    Event, EventRef, EventTemplate, KIND_CLIENT_AUTH, KIND_FOLLOW_LIST, KIND_NOTE, KIND_PROFILE,
    KIND_RELAY_LIST, KindClassification, classify_kind, validate_event,
};
pub use filter::Filter;
pub use follows::{Follow, FollowList, FollowListError};
pub use profile::{Profile, ProfileError};
pub use relay_list::{RelayEntry, RelayList, RelayListError, RelayMarker};
