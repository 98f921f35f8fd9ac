//! Single relay connection management.
//!
//! One `RelayConnection` per relay URL, shared by every subscription against
//! that relay. Connecting is bounded by a timeout and guarded by an
//! exponential backoff schedule, so a dead relay fails fast instead of being
//! re-dialed by every new query. A failed connection is never fatal to the
//! caller: multi-relay operations degrade it to an already-complete, empty
//! subscription.

use crate::auth::AUTH_REQUIRED_PREFIX;
use crate::error::{ClientError, Result};
use crate::message::{ClientMessage, RelayMessage};
use driftline_core::{Event, Filter};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, RwLock, mpsc, oneshot};
use tokio::time::timeout;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Disconnected
    Disconnected,
    /// Currently connecting
    Connecting,
    /// Connected and ready
    Connected,
}

/// Per-subscription updates delivered by a connection.
#[derive(Debug, Clone)]
pub enum SubscriptionUpdate {
    /// An event matching the subscription
    Event(Event),
    /// The relay exhausted its stored matches
    Eose,
    /// The relay closed the subscription with a reason
    Closed(String),
    /// The relay requires authentication; carries the pending challenge
    AuthRequired(String),
}

/// Acknowledgment for a sent event (publish or auth response).
#[derive(Debug, Clone)]
pub struct PublishConfirmation {
    /// Event ID that was sent
    pub event_id: String,
    /// Whether the relay accepted the event
    pub accepted: bool,
    /// Relay message (empty on acceptance, reason on rejection)
    pub message: String,
}

/// Relay connection configuration
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Connection timeout
    pub connect_timeout: Duration,
    /// How long to wait for an OK acknowledgment after sending an event
    pub publish_timeout: Duration,
    /// Initial delay before re-dialing a failed relay
    pub reconnect_delay: Duration,
    /// Cap on the re-dial delay
    pub max_reconnect_delay: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            publish_timeout: Duration::from_secs(10),
            reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(60),
        }
    }
}

/// Exponential backoff schedule for re-dialing a relay.
#[derive(Debug, Default)]
struct RetrySchedule {
    failures: u32,
    next_allowed: Option<tokio::time::Instant>,
}

impl RetrySchedule {
    fn ready(&self) -> bool {
        self.next_allowed
            .map(|t| tokio::time::Instant::now() >= t)
            .unwrap_or(true)
    }

    fn record_failure(&mut self, config: &ConnectionConfig) {
        let exp = self.failures.min(16);
        let delay = config
            .reconnect_delay
            .saturating_mul(2u32.saturating_pow(exp))
            .min(config.max_reconnect_delay);
        self.failures += 1;
        self.next_allowed = Some(tokio::time::Instant::now() + delay);
    }

    fn record_success(&mut self) {
        self.failures = 0;
        self.next_allowed = None;
    }
}

/// Connection to one relay.
pub struct RelayConnection {
    /// Relay URL
    url: Url,
    /// Configuration
    config: ConnectionConfig,
    /// Connection state
    state: Arc<RwLock<ConnectionState>>,
    /// Write half of the socket
    writer: Arc<Mutex<Option<WsSink>>>,
    /// Active subscriptions (subscription id -> update sender)
    subscriptions: Arc<Mutex<HashMap<String, mpsc::UnboundedSender<SubscriptionUpdate>>>>,
    /// Pending OK acknowledgments (event id -> oneshot sender)
    pending_oks: Arc<Mutex<HashMap<String, oneshot::Sender<PublishConfirmation>>>>,
    /// Last authentication challenge issued by the relay
    auth_challenge: Arc<RwLock<Option<String>>>,
    /// Timestamp of the most recent event seen from this relay
    last_event_at: Arc<RwLock<Option<u64>>>,
    /// Re-dial backoff
    retry: Arc<Mutex<RetrySchedule>>,
    /// Serializes concurrent connect attempts
    connect_lock: Arc<Mutex<()>>,
    /// Receive loop task handle
    read_task: Arc<Mutex<Option<tokio::task::JoinHandle<()>>>>,
}

impl RelayConnection {
    /// Create a new relay connection (does not connect yet).
    pub fn new(url: &str, config: ConnectionConfig) -> Result<Self> {
        let url = Url::parse(url)?;
        if url.scheme() != "ws" && url.scheme() != "wss" {
            return Err(ClientError::InvalidUrl(format!(
                "URL must use ws:// or wss:// scheme, got: {}",
                url.scheme()
            )));
        }

        Ok(Self {
            url,
            config,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            writer: Arc::new(Mutex::new(None)),
            subscriptions: Arc::new(Mutex::new(HashMap::new())),
            pending_oks: Arc::new(Mutex::new(HashMap::new())),
            auth_challenge: Arc::new(RwLock::new(None)),
            last_event_at: Arc::new(RwLock::new(None)),
            retry: Arc::new(Mutex::new(RetrySchedule::default())),
            connect_lock: Arc::new(Mutex::new(())),
            read_task: Arc::new(Mutex::new(None)),
        })
    }

    /// Connect to the relay. No-op when already connected.
    ///
    /// Bounded by `connect_timeout`; respects the backoff schedule after
    /// earlier failures so callers that re-ensure a dead relay fail fast.
    pub async fn connect(&self) -> Result<()> {
        let _guard = self.connect_lock.lock().await;
        if self.is_connected().await {
            return Ok(());
        }

        if !self.retry.lock().await.ready() {
            return Err(ClientError::Timeout(format!(
                "backing off from {}",
                self.url
            )));
        }

        *self.state.write().await = ConnectionState::Connecting;
        info!("connecting to relay: {}", self.url);

        let ws_stream = match timeout(
            self.config.connect_timeout,
            connect_async(self.url.as_str()),
        )
        .await
        {
            Ok(Ok((stream, _))) => stream,
            Ok(Err(e)) => {
                *self.state.write().await = ConnectionState::Disconnected;
                self.retry.lock().await.record_failure(&self.config);
                return Err(ClientError::WebSocket(e.to_string()));
            }
            Err(_) => {
                *self.state.write().await = ConnectionState::Disconnected;
                self.retry.lock().await.record_failure(&self.config);
                return Err(ClientError::Timeout(format!(
                    "connection timeout after {:?}",
                    self.config.connect_timeout
                )));
            }
        };

        let (sink, stream) = ws_stream.split();
        *self.writer.lock().await = Some(sink);
        *self.state.write().await = ConnectionState::Connected;
        self.retry.lock().await.record_success();
        info!("connected to relay: {}", self.url);

        self.spawn_read_loop(stream).await;
        Ok(())
    }

    /// Start the background receive loop for the read half of the socket.
    async fn spawn_read_loop(&self, mut stream: SplitStream<WsStream>) {
        let url = self.url.to_string();
        let state = Arc::clone(&self.state);
        let writer = Arc::clone(&self.writer);
        let subscriptions = Arc::clone(&self.subscriptions);
        let pending_oks = Arc::clone(&self.pending_oks);
        let auth_challenge = Arc::clone(&self.auth_challenge);
        let last_event_at = Arc::clone(&self.last_event_at);

        let handle = tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(Message::Text(text)) => match RelayMessage::from_json(text.as_str()) {
                        Ok(msg) => {
                            route_message(
                                &url,
                                msg,
                                &subscriptions,
                                &pending_oks,
                                &auth_challenge,
                                &last_event_at,
                            )
                            .await;
                        }
                        Err(e) => {
                            warn!("dropping unparseable frame from {}: {}", url, e);
                        }
                    },
                    Ok(Message::Ping(data)) => {
                        let mut w = writer.lock().await;
                        if let Some(sink) = w.as_mut() {
                            let _ = sink.send(Message::Pong(data)).await;
                        }
                    }
                    Ok(Message::Close(_)) => {
                        info!("relay {} closed connection", url);
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("websocket error from {}: {}", url, e);
                        break;
                    }
                }
            }

            *state.write().await = ConnectionState::Disconnected;
            *writer.lock().await = None;
            pending_oks.lock().await.clear();
            let mut subs = subscriptions.lock().await;
            for (_, tx) in subs.drain() {
                let _ = tx.send(SubscriptionUpdate::Closed("connection reset".to_string()));
            }
        });

        *self.read_task.lock().await = Some(handle);
    }

    /// Disconnect from the relay.
    pub async fn disconnect(&self) {
        if let Some(handle) = self.read_task.lock().await.take() {
            handle.abort();
        }
        if let Some(mut sink) = self.writer.lock().await.take() {
            let _ = sink.close().await;
        }
        *self.state.write().await = ConnectionState::Disconnected;
        self.pending_oks.lock().await.clear();
        let mut subs = self.subscriptions.lock().await;
        for (_, tx) in subs.drain() {
            let _ = tx.send(SubscriptionUpdate::Closed("disconnected".to_string()));
        }
        info!("disconnected from relay: {}", self.url);
    }

    /// Get current connection state.
    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Check if connected.
    pub async fn is_connected(&self) -> bool {
        *self.state.read().await == ConnectionState::Connected
    }

    /// The most recent auth challenge issued by this relay, if any.
    pub async fn auth_challenge(&self) -> Option<String> {
        self.auth_challenge.read().await.clone()
    }

    /// Timestamp of the newest event this relay has delivered.
    pub async fn last_event_at(&self) -> Option<u64> {
        *self.last_event_at.read().await
    }

    /// Send a client message to the relay.
    pub async fn send_message(&self, msg: &ClientMessage) -> Result<()> {
        let text = msg
            .to_json()
            .map_err(|e| ClientError::Protocol(e.to_string()))?;
        debug!("sending to {}: {}", self.url, text);

        let mut writer = self.writer.lock().await;
        match writer.as_mut() {
            Some(sink) => sink
                .send(Message::Text(text.into()))
                .await
                .map_err(|e| ClientError::WebSocket(e.to_string())),
            None => Err(ClientError::NotConnected),
        }
    }

    /// Open a subscription and receive its updates through a channel.
    pub async fn subscribe(
        &self,
        subscription_id: &str,
        filters: Vec<Filter>,
    ) -> Result<mpsc::UnboundedReceiver<SubscriptionUpdate>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscriptions
            .lock()
            .await
            .insert(subscription_id.to_string(), tx);

        let req = ClientMessage::Req {
            subscription_id: subscription_id.to_string(),
            filters,
        };
        if let Err(e) = self.send_message(&req).await {
            self.subscriptions.lock().await.remove(subscription_id);
            return Err(e);
        }
        Ok(rx)
    }

    /// Re-issue the REQ for an already-registered subscription (after a
    /// successful authentication). The original update channel keeps working.
    pub async fn resubscribe(&self, subscription_id: &str, filters: Vec<Filter>) -> Result<()> {
        self.send_message(&ClientMessage::Req {
            subscription_id: subscription_id.to_string(),
            filters,
        })
        .await
    }

    /// Close a subscription.
    pub async fn unsubscribe(&self, subscription_id: &str) -> Result<()> {
        self.subscriptions.lock().await.remove(subscription_id);
        self.send_message(&ClientMessage::Close {
            subscription_id: subscription_id.to_string(),
        })
        .await
    }

    /// Publish an event and wait for the relay's acknowledgment.
    pub async fn publish(&self, event: &Event) -> Result<PublishConfirmation> {
        self.send_acknowledged(event, ClientMessage::Event(event.clone()))
            .await
    }

    /// Answer an auth challenge and wait for the relay's acknowledgment.
    pub async fn auth(&self, event: &Event) -> Result<PublishConfirmation> {
        self.send_acknowledged(event, ClientMessage::Auth(event.clone()))
            .await
    }

    async fn send_acknowledged(
        &self,
        event: &Event,
        msg: ClientMessage,
    ) -> Result<PublishConfirmation> {
        let (tx, rx) = oneshot::channel();
        self.pending_oks.lock().await.insert(event.id.clone(), tx);

        if let Err(e) = self.send_message(&msg).await {
            self.pending_oks.lock().await.remove(&event.id);
            return Err(e);
        }

        match timeout(self.config.publish_timeout, rx).await {
            Ok(Ok(confirmation)) => Ok(confirmation),
            Ok(Err(_)) => Err(ClientError::WebSocket(
                "connection closed before acknowledgment".to_string(),
            )),
            Err(_) => {
                self.pending_oks.lock().await.remove(&event.id);
                Err(ClientError::Timeout(format!(
                    "no acknowledgment after {:?}",
                    self.config.publish_timeout
                )))
            }
        }
    }

    /// Get relay URL.
    pub fn url(&self) -> &Url {
        &self.url
    }
}

/// Route one parsed relay message to its consumer.
async fn route_message(
    url: &str,
    msg: RelayMessage,
    subscriptions: &Mutex<HashMap<String, mpsc::UnboundedSender<SubscriptionUpdate>>>,
    pending_oks: &Mutex<HashMap<String, oneshot::Sender<PublishConfirmation>>>,
    auth_challenge: &RwLock<Option<String>>,
    last_event_at: &RwLock<Option<u64>>,
) {
    match msg {
        RelayMessage::Event {
            subscription_id,
            event,
        } => {
            *last_event_at.write().await = Some(event.created_at);
            let mut subs = subscriptions.lock().await;
            if let Some(tx) = subs.get(&subscription_id)
                && tx.send(SubscriptionUpdate::Event(event)).is_err()
            {
                debug!("subscription {} receiver dropped, removing", subscription_id);
                subs.remove(&subscription_id);
            }
        }
        RelayMessage::Ok {
            event_id,
            success,
            message,
        } => {
            if let Some(tx) = pending_oks.lock().await.remove(&event_id) {
                let _ = tx.send(PublishConfirmation {
                    event_id,
                    accepted: success,
                    message,
                });
            }
        }
        RelayMessage::Eose { subscription_id } => {
            let subs = subscriptions.lock().await;
            if let Some(tx) = subs.get(&subscription_id) {
                let _ = tx.send(SubscriptionUpdate::Eose);
            }
        }
        RelayMessage::Closed {
            subscription_id,
            message,
        } => {
            let challenge = auth_challenge.read().await.clone();
            let update = classify_closed(&message, challenge);
            let keep = matches!(update, SubscriptionUpdate::AuthRequired(_));
            let mut subs = subscriptions.lock().await;
            if let Some(tx) = subs.get(&subscription_id) {
                let _ = tx.send(update);
            }
            if !keep {
                subs.remove(&subscription_id);
            }
        }
        RelayMessage::Notice { message } => {
            debug!("notice from {}: {}", url, message);
        }
        RelayMessage::Auth { challenge } => {
            debug!("auth challenge from {}", url);
            *auth_challenge.write().await = Some(challenge);
        }
    }
}

/// Map a CLOSED reason to a subscription update.
///
/// A close whose reason carries the auth-required prefix becomes an
/// [`SubscriptionUpdate::AuthRequired`] when the relay has issued a challenge;
/// without a challenge there is nothing to sign and the close stays terminal.
fn classify_closed(message: &str, challenge: Option<String>) -> SubscriptionUpdate {
    if message.starts_with(AUTH_REQUIRED_PREFIX)
        && let Some(challenge) = challenge
    {
        return SubscriptionUpdate::AuthRequired(challenge);
    }
    SubscriptionUpdate::Closed(message.to_string())
}
