//! Client error types.
//!
//! Failures local to one relay are absorbed by the multi-relay operations
//! (an unreachable relay degrades to an already-complete empty subscription,
//! a malformed event is dropped, a rejected publish is collected); only total
//! failure surfaces to callers.

use thiserror::Error;

/// Client error type
#[derive(Error, Debug)]
pub enum ClientError {
    /// WebSocket error
    #[error("websocket error: {0}")]
    WebSocket(String),

    /// Invalid URL
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// URL parse error
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// Timeout error
    #[error("timeout: {0}")]
    Timeout(String),

    /// Not connected to relay
    #[error("not connected to relay")]
    NotConnected,

    /// Relay protocol error
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Subscription error
    #[error("subscription error: {0}")]
    Subscription(String),

    /// Subscription closed by the relay
    #[error("subscription closed by relay: {0}")]
    SubscriptionClosed(String),

    /// Authentication failed for one relay
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// No signer capability available to answer an auth challenge
    #[error("no signer available")]
    NoSigner,

    /// A relay rejected a published event
    #[error("publish rejected: {0}")]
    PublishRejected(String),

    /// No relays were given for an operation that needs at least one
    #[error("no relays")]
    NoRelays,

    /// Every relay in the set failed; carries (relay url, failure) pairs
    #[error("operation failed on all {} relays", failures.len())]
    AllRelaysFailed { failures: Vec<(String, String)> },

    /// No cached timeline exists for the query key
    #[error("unknown timeline")]
    UnknownTimeline,

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

/// Client result type
pub type Result<T> = std::result::Result<T, ClientError>;
