//! Relay wire messages.
//!
//! Client to relay: EVENT, REQ, CLOSE, AUTH.
//! Relay to client: EVENT, OK, EOSE, CLOSED, NOTICE, AUTH.
//!
//! Parsing is per-message: a frame that fails to parse is dropped with a
//! warning by the connection, it never terminates the connection itself.

use driftline_core::{Event, Filter};
use serde_json::Value;
use thiserror::Error;

/// Errors that can occur when parsing relay messages.
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("invalid message format: {0}")]
    InvalidFormat(String),

    #[error("unknown message type: {0}")]
    UnknownType(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing field: {0}")]
    MissingField(String),
}

/// Messages sent from client to relay.
#[derive(Debug, Clone)]
pub enum ClientMessage {
    /// Publish an event: ["EVENT", <event JSON>]
    Event(Event),

    /// Subscribe to events: ["REQ", <subscription_id>, <filter1>, <filter2>, ...]
    Req {
        subscription_id: String,
        filters: Vec<Filter>,
    },

    /// Close a subscription: ["CLOSE", <subscription_id>]
    Close { subscription_id: String },

    /// Answer an authentication challenge: ["AUTH", <event JSON>]
    Auth(Event),
}

impl ClientMessage {
    /// Serialize to a JSON array for sending to the relay.
    pub fn to_json(&self) -> Result<String, MessageError> {
        let value = match self {
            ClientMessage::Event(event) => serde_json::json!(["EVENT", event]),
            ClientMessage::Req {
                subscription_id,
                filters,
            } => {
                let mut frame = vec![serde_json::json!("REQ"), serde_json::json!(subscription_id)];
                frame.extend(
                    filters
                        .iter()
                        .map(serde_json::to_value)
                        .collect::<Result<Vec<_>, _>>()?,
                );
                Value::Array(frame)
            }
            ClientMessage::Close { subscription_id } => {
                serde_json::json!(["CLOSE", subscription_id])
            }
            ClientMessage::Auth(event) => serde_json::json!(["AUTH", event]),
        };
        Ok(value.to_string())
    }
}

/// Messages sent from relay to client.
#[derive(Debug, Clone)]
pub enum RelayMessage {
    /// Event matching a subscription: ["EVENT", <subscription_id>, <event JSON>]
    Event {
        subscription_id: String,
        event: Event,
    },

    /// Command result: ["OK", <event_id>, <true|false>, <message>]
    Ok {
        event_id: String,
        success: bool,
        message: String,
    },

    /// End of stored events: ["EOSE", <subscription_id>]
    Eose { subscription_id: String },

    /// Subscription closed by relay: ["CLOSED", <subscription_id>, <message>]
    Closed {
        subscription_id: String,
        message: String,
    },

    /// Human-readable notice: ["NOTICE", <message>]
    Notice { message: String },

    /// Authentication challenge: ["AUTH", <challenge>]
    Auth { challenge: String },
}

impl RelayMessage {
    /// Parse a JSON frame from the relay.
    ///
    /// Frames are arrays whose first element labels the message; the label
    /// picks the decoder for the remaining elements.
    pub fn from_json(json: &str) -> Result<Self, MessageError> {
        let frame: Vec<Value> =
            serde_json::from_str(json).map_err(|e| MessageError::InvalidFormat(e.to_string()))?;

        let Some((label, body)) = frame.split_first() else {
            return Err(MessageError::InvalidFormat("empty frame".to_string()));
        };
        let label = label
            .as_str()
            .ok_or_else(|| MessageError::InvalidFormat("frame label must be text".to_string()))?;

        match label {
            "EVENT" => decode_event(body),
            "OK" => decode_ok(body),
            "EOSE" => Ok(RelayMessage::Eose {
                subscription_id: text(body, 0, "EOSE carries no subscription id")?,
            }),
            "CLOSED" => Ok(RelayMessage::Closed {
                subscription_id: text(body, 0, "CLOSED carries no subscription id")?,
                message: lenient_text(body, 1),
            }),
            "NOTICE" => Ok(RelayMessage::Notice {
                message: text(body, 0, "NOTICE carries no text")?,
            }),
            "AUTH" => Ok(RelayMessage::Auth {
                challenge: text(body, 0, "AUTH carries no challenge")?,
            }),
            other => Err(MessageError::UnknownType(other.to_string())),
        }
    }
}

/// Required string element of a frame body.
fn text(body: &[Value], idx: usize, missing: &str) -> Result<String, MessageError> {
    body.get(idx)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| MessageError::MissingField(missing.to_string()))
}

/// Optional string element; anything absent or non-text reads as empty.
fn lenient_text(body: &[Value], idx: usize) -> String {
    body.get(idx)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn decode_event(body: &[Value]) -> Result<RelayMessage, MessageError> {
    let subscription_id = text(body, 0, "EVENT carries no subscription id")?;
    let payload = body
        .get(1)
        .ok_or_else(|| MessageError::MissingField("EVENT carries no payload".to_string()))?;
    let event: Event = serde_json::from_value(payload.clone())?;
    Ok(RelayMessage::Event {
        subscription_id,
        event,
    })
}

fn decode_ok(body: &[Value]) -> Result<RelayMessage, MessageError> {
    let event_id = text(body, 0, "OK carries no event id")?;
    let success = body
        .get(1)
        .and_then(Value::as_bool)
        .ok_or_else(|| MessageError::MissingField("OK carries no acceptance flag".to_string()))?;
    Ok(RelayMessage::Ok {
        event_id,
        success,
        message: lenient_text(body, 2),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_event() -> Event {
        Event {
            id: "abc".to_string(),
            pubkey: "pk".to_string(),
            created_at: 123,
            kind: 1,
            tags: vec![],
            content: "Hello".to_string(),
            sig: "sig".to_string(),
        }
    }

    #[test]
    fn test_client_message_event() {
        let msg = ClientMessage::Event(test_event());
        let json = msg.to_json().unwrap();
        assert!(json.starts_with(r#"["EVENT""#));
        assert!(json.contains("abc"));
    }

    #[test]
    fn test_client_message_req() {
        let filter = Filter::new().kinds(vec![1]).limit(10);
        let msg = ClientMessage::Req {
            subscription_id: "sub1".to_string(),
            filters: vec![filter],
        };
        let json = msg.to_json().unwrap();
        assert!(json.contains("REQ"));
        assert!(json.contains("sub1"));
        assert!(json.contains("kinds"));
    }

    #[test]
    fn test_client_message_close() {
        let msg = ClientMessage::Close {
            subscription_id: "sub1".to_string(),
        };
        assert_eq!(msg.to_json().unwrap(), r#"["CLOSE","sub1"]"#);
    }

    #[test]
    fn test_client_message_auth() {
        let msg = ClientMessage::Auth(test_event());
        let json = msg.to_json().unwrap();
        assert!(json.starts_with(r#"["AUTH""#));
    }

    #[test]
    fn test_relay_message_event() {
        let json = r#"["EVENT","sub1",{"id":"abc","pubkey":"pk","created_at":123,"kind":1,"tags":[],"content":"Hello","sig":"sig"}]"#;
        match RelayMessage::from_json(json).unwrap() {
            RelayMessage::Event {
                subscription_id,
                event,
            } => {
                assert_eq!(subscription_id, "sub1");
                assert_eq!(event.id, "abc");
                assert_eq!(event.content, "Hello");
            }
            _ => panic!("wrong message type"),
        }
    }

    #[test]
    fn test_relay_message_ok() {
        let json = r#"["OK","event123",false,"duplicate: already have this event"]"#;
        match RelayMessage::from_json(json).unwrap() {
            RelayMessage::Ok {
                event_id,
                success,
                message,
            } => {
                assert_eq!(event_id, "event123");
                assert!(!success);
                assert!(message.contains("duplicate"));
            }
            _ => panic!("wrong message type"),
        }
    }

    #[test]
    fn test_relay_message_eose() {
        let json = r#"["EOSE","sub1"]"#;
        match RelayMessage::from_json(json).unwrap() {
            RelayMessage::Eose { subscription_id } => assert_eq!(subscription_id, "sub1"),
            _ => panic!("wrong message type"),
        }
    }

    #[test]
    fn test_relay_message_closed() {
        let json = r#"["CLOSED","sub1","auth-required: we only serve registered users"]"#;
        match RelayMessage::from_json(json).unwrap() {
            RelayMessage::Closed {
                subscription_id,
                message,
            } => {
                assert_eq!(subscription_id, "sub1");
                assert!(message.starts_with("auth-required:"));
            }
            _ => panic!("wrong message type"),
        }
    }

    #[test]
    fn test_relay_message_notice() {
        let json = r#"["NOTICE","rate limited"]"#;
        match RelayMessage::from_json(json).unwrap() {
            RelayMessage::Notice { message } => assert_eq!(message, "rate limited"),
            _ => panic!("wrong message type"),
        }
    }

    #[test]
    fn test_relay_message_auth() {
        let json = r#"["AUTH","challenge123"]"#;
        match RelayMessage::from_json(json).unwrap() {
            RelayMessage::Auth { challenge } => assert_eq!(challenge, "challenge123"),
            _ => panic!("wrong message type"),
        }
    }

    #[test]
    fn test_invalid_messages() {
        assert!(RelayMessage::from_json("not valid json").is_err());
        assert!(RelayMessage::from_json("[]").is_err());
        assert!(RelayMessage::from_json(r#"["UNKNOWN"]"#).is_err());
        assert!(RelayMessage::from_json(r#"["EVENT","sub1"]"#).is_err());
    }
}
