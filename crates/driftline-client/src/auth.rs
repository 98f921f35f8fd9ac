//! Relay authentication handling.
//!
//! A relay may close a subscription (or reject a publish) with an
//! auth-required reason after issuing a challenge. The response is an
//! ephemeral event of kind 22242 carrying the relay URL and the challenge,
//! signed by the injected signer capability.
//!
//! Each subscription gets at most one handshake per relay: a second challenge
//! on an already-authenticated subscription is terminal, so a misbehaving
//! relay cannot drive an authentication loop.

use crate::connection::RelayConnection;
use crate::error::{ClientError, Result};
use crate::signer::Signer;
use driftline_core::{EventTemplate, KIND_CLIENT_AUTH};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Machine-readable prefix relays use on auth-related close/reject reasons.
pub const AUTH_REQUIRED_PREFIX: &str = "auth-required: ";

/// The human-readable part of an auth-required reason, if it is one.
pub fn auth_required_reason(message: &str) -> Option<&str> {
    message.strip_prefix(AUTH_REQUIRED_PREFIX.trim_end())
}

/// Build the challenge-response draft for a relay.
pub fn challenge_template(relay_url: &str, challenge: &str, created_at: u64) -> EventTemplate {
    EventTemplate {
        created_at,
        kind: KIND_CLIENT_AUTH,
        tags: vec![
            vec!["relay".to_string(), relay_url.to_string()],
            vec!["challenge".to_string(), challenge.to_string()],
        ],
        content: String::new(),
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Per-relay authentication state of one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    /// No challenge seen
    Open,
    /// Handshake in flight
    Authenticating,
    /// Handshake succeeded, subscription resumed
    Authenticated,
    /// Handshake failed or was re-requested; terminal
    Failed,
}

/// Tracks which relays a subscription has attempted a handshake with.
#[derive(Debug, Default)]
pub struct AuthTracker {
    states: Mutex<HashMap<String, AuthState>>,
}

impl AuthTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin a handshake with a relay. Returns `false` when one was already
    /// attempted, which the caller must treat as terminal.
    pub fn begin(&self, relay_url: &str) -> bool {
        let mut states = self.states.lock().unwrap();
        match states.get(relay_url).copied().unwrap_or(AuthState::Open) {
            AuthState::Open => {
                states.insert(relay_url.to_string(), AuthState::Authenticating);
                true
            }
            _ => {
                states.insert(relay_url.to_string(), AuthState::Failed);
                false
            }
        }
    }

    /// Record the outcome of a handshake.
    pub fn finish(&self, relay_url: &str, ok: bool) {
        let state = if ok {
            AuthState::Authenticated
        } else {
            AuthState::Failed
        };
        self.states
            .lock()
            .unwrap()
            .insert(relay_url.to_string(), state);
    }

    /// Current state for a relay.
    pub fn state(&self, relay_url: &str) -> AuthState {
        self.states
            .lock()
            .unwrap()
            .get(relay_url)
            .copied()
            .unwrap_or(AuthState::Open)
    }
}

/// Performs the authentication handshake against one relay.
pub struct Authenticator {
    signer: Option<Arc<dyn Signer>>,
}

impl Authenticator {
    pub fn new(signer: Option<Arc<dyn Signer>>) -> Self {
        Self { signer }
    }

    /// Whether a handshake is possible at all.
    pub fn can_authenticate(&self) -> bool {
        self.signer.is_some()
    }

    /// Sign the challenge and send the response on the given connection.
    ///
    /// Returns `Ok(())` only when the relay acknowledges the response.
    pub async fn respond(&self, conn: &RelayConnection, challenge: &str) -> Result<()> {
        let signer = self.signer.as_ref().ok_or(ClientError::NoSigner)?;
        let url = conn.url().to_string();
        debug!("answering auth challenge from {}", url);

        let template = challenge_template(&url, challenge, unix_now());
        let event = signer.sign_event(template).await?;
        let confirmation = conn.auth(&event).await?;
        if confirmation.accepted {
            debug!("authenticated to {}", url);
            Ok(())
        } else {
            warn!("auth rejected by {}: {}", url, confirmation.message);
            Err(ClientError::AuthFailed(confirmation.message))
        }
    }
}
