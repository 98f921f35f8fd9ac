//! Publish fan-out.
//!
//! A publish goes to every relay in the set concurrently and resolves as soon
//! as one relay accepts. A relay that demands authentication gets one
//! handshake and one retry; per-relay failures are collected and surface only
//! as an aggregate when every relay ultimately fails.

use crate::auth::{Authenticator, auth_required_reason};
use crate::connection::PublishConfirmation;
use crate::error::{ClientError, Result};
use crate::pool::RelayPool;
use driftline_core::Event;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use std::future::Future;
use tracing::{debug, info};

/// Publish an event to a relay set, resolving on first acceptance.
pub async fn publish_event(
    pool: &RelayPool,
    authenticator: &Authenticator,
    relays: &[String],
    event: &Event,
) -> Result<PublishConfirmation> {
    let attempts: Vec<_> = relays
        .iter()
        .map(|url| {
            (
                url.clone(),
                attempt_publish(pool, authenticator, url.clone(), event),
            )
        })
        .collect();

    let confirmation = race_first_success(attempts).await?;
    info!("event {} accepted by a relay", event.id);
    Ok(confirmation)
}

/// Publish to one relay, answering at most one auth challenge.
async fn attempt_publish(
    pool: &RelayPool,
    authenticator: &Authenticator,
    url: String,
    event: &Event,
) -> Result<PublishConfirmation> {
    let confirmation = pool.publish(&url, event).await?;
    if confirmation.accepted {
        return Ok(confirmation);
    }

    if auth_required_reason(&confirmation.message).is_some() && authenticator.can_authenticate() {
        debug!("relay {} wants auth before accepting publish", url);
        let conn = pool.ensure(&url).await?;
        let challenge = conn
            .auth_challenge()
            .await
            .ok_or_else(|| ClientError::AuthFailed("relay issued no challenge".to_string()))?;
        authenticator.respond(&conn, &challenge).await?;

        let retry = conn.publish(event).await?;
        if retry.accepted {
            return Ok(retry);
        }
        return Err(ClientError::PublishRejected(retry.message));
    }

    Err(ClientError::PublishRejected(confirmation.message))
}

/// Drive the attempts concurrently; resolve on the first success, or collect
/// every failure into an aggregate.
pub(crate) async fn race_first_success<F>(
    attempts: Vec<(String, F)>,
) -> Result<PublishConfirmation>
where
    F: Future<Output = Result<PublishConfirmation>>,
{
    if attempts.is_empty() {
        return Err(ClientError::NoRelays);
    }

    let mut in_flight: FuturesUnordered<_> = attempts
        .into_iter()
        .map(|(url, attempt)| async move { (url, attempt.await) })
        .collect();

    let mut failures = Vec::new();
    while let Some((url, result)) = in_flight.next().await {
        match result {
            Ok(confirmation) => return Ok(confirmation),
            Err(e) => {
                debug!("publish to {} failed: {}", url, e);
                failures.push((url, e.to_string()));
            }
        }
    }
    Err(ClientError::AllRelaysFailed { failures })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::{BoxFuture, FutureExt};

    fn accepted(id: &str) -> PublishConfirmation {
        PublishConfirmation {
            event_id: id.to_string(),
            accepted: true,
            message: String::new(),
        }
    }

    fn boxed_ok(id: &'static str) -> BoxFuture<'static, Result<PublishConfirmation>> {
        async move { Ok(accepted(id)) }.boxed()
    }

    fn boxed_err(msg: &'static str) -> BoxFuture<'static, Result<PublishConfirmation>> {
        async move { Err(ClientError::PublishRejected(msg.to_string())) }.boxed()
    }

    #[tokio::test]
    async fn test_first_success_wins() {
        let attempts = vec![
            ("wss://a.example.com".to_string(), boxed_err("rejected")),
            ("wss://b.example.com".to_string(), boxed_ok("event1")),
        ];
        let confirmation = race_first_success(attempts).await.unwrap();
        assert_eq!(confirmation.event_id, "event1");
        assert!(confirmation.accepted);
    }

    #[tokio::test]
    async fn test_success_preempts_slow_failures() {
        let attempts = vec![
            (
                "wss://slow.example.com".to_string(),
                async {
                    tokio::time::sleep(std::time::Duration::from_secs(30)).await;
                    Err(ClientError::Timeout("slow relay".to_string()))
                }
                .boxed(),
            ),
            ("wss://fast.example.com".to_string(), boxed_ok("event1")),
        ];
        let confirmation = race_first_success(attempts).await.unwrap();
        assert_eq!(confirmation.event_id, "event1");
    }

    #[tokio::test]
    async fn test_all_failures_aggregate() {
        let attempts = vec![
            ("wss://a.example.com".to_string(), boxed_err("invalid: bad sig")),
            ("wss://b.example.com".to_string(), boxed_err("blocked: spam")),
        ];
        match race_first_success(attempts).await {
            Err(ClientError::AllRelaysFailed { failures }) => {
                assert_eq!(failures.len(), 2);
                assert!(failures.iter().any(|(_, e)| e.contains("bad sig")));
                assert!(failures.iter().any(|(_, e)| e.contains("spam")));
            }
            other => panic!("unexpected result: {:?}", other.map(|c| c.event_id)),
        }
    }

    #[tokio::test]
    async fn test_no_relays() {
        let attempts: Vec<(String, BoxFuture<'static, Result<PublishConfirmation>>)> = vec![];
        assert!(matches!(
            race_first_success(attempts).await,
            Err(ClientError::NoRelays)
        ));
    }
}
