//! Frame types for the Herald streaming protocol.
//!
//! Every frame is a JSON-shaped object tagged by its `action` field. Client
//! frames are [`Request`]s wrapping a closed [`Action`] enum; server frames are
//! [`Reply`]s.

use crate::codec::{Malformed, ProtocolError};
use crate::version::Version;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Opaque publisher payload. Always a JSON object.
pub type Payload = Map<String, Value>;

/// An action requested by a client.
///
/// Only serialized; inbound frames are validated by [`Request::from_value`]
/// so that errors can name the offending field.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    /// Subscribe to a topic, optionally replaying recent history first.
    Subscribe {
        /// Topic name.
        topic: String,
        /// Number of historical messages to replay before live delivery.
        replay_last: usize,
    },

    /// Stop receiving live messages for a topic.
    Unsubscribe {
        /// Topic name.
        topic: String,
    },

    /// Publish a message to a topic.
    Publish {
        /// Topic name.
        topic: String,
        /// Opaque payload forwarded verbatim to subscribers.
        message: Payload,
    },

    /// Keepalive.
    Ping,
}

impl Action {
    /// Wire name of the action.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Action::Subscribe { .. } => "subscribe",
            Action::Unsubscribe { .. } => "unsubscribe",
            Action::Publish { .. } => "publish",
            Action::Ping => "ping",
        }
    }

    /// Topic the action targets, if any.
    #[must_use]
    pub fn topic(&self) -> Option<&str> {
        match self {
            Action::Subscribe { topic, .. }
            | Action::Unsubscribe { topic }
            | Action::Publish { topic, .. } => Some(topic),
            Action::Ping => None,
        }
    }
}

/// A client request: an action plus an optional correlation id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Request {
    /// Echoed back in the reply so clients can correlate responses.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// The requested action.
    #[serde(flatten)]
    pub action: Action,
}

impl Request {
    /// Create a request without a correlation id.
    #[must_use]
    pub fn new(action: Action) -> Self {
        Self {
            request_id: None,
            action,
        }
    }

    /// Attach a correlation id.
    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Create a subscribe request.
    #[must_use]
    pub fn subscribe(topic: impl Into<String>, replay_last: usize) -> Self {
        Self::new(Action::Subscribe {
            topic: topic.into(),
            replay_last,
        })
    }

    /// Create an unsubscribe request.
    #[must_use]
    pub fn unsubscribe(topic: impl Into<String>) -> Self {
        Self::new(Action::Unsubscribe {
            topic: topic.into(),
        })
    }

    /// Create a publish request.
    #[must_use]
    pub fn publish(topic: impl Into<String>, message: Payload) -> Self {
        Self::new(Action::Publish {
            topic: topic.into(),
            message,
        })
    }

    /// Create a ping request.
    #[must_use]
    pub fn ping() -> Self {
        Self::new(Action::Ping)
    }

    /// Validate an already-parsed JSON value into a request.
    ///
    /// Validation happens field by field so that the error names the field
    /// that was wrong. The correlation id is recovered whenever possible so
    /// the error reply can still be matched by the client.
    ///
    /// # Errors
    ///
    /// Returns [`Malformed`] if the value is not a valid request.
    pub fn from_value(value: Value) -> Result<Self, Malformed> {
        let Value::Object(mut object) = value else {
            return Err(ProtocolError::invalid("$", "request must be a JSON object").into());
        };

        let request_id = match object.remove("request_id") {
            None | Some(Value::Null) => None,
            Some(Value::String(id)) => Some(id),
            Some(Value::Number(id)) => Some(id.to_string()),
            Some(_) => {
                return Err(
                    ProtocolError::invalid("request_id", "must be a string or a number").into(),
                )
            }
        };

        let reject = |error: ProtocolError| Malformed {
            request_id: request_id.clone(),
            error,
        };

        let action = match object.get("action") {
            None => return Err(reject(ProtocolError::invalid("action", "field is required"))),
            Some(Value::String(action)) => action.clone(),
            Some(_) => return Err(reject(ProtocolError::invalid("action", "must be a string"))),
        };

        let action = match action.as_str() {
            "subscribe" => Action::Subscribe {
                topic: required_topic(&object).map_err(reject)?,
                replay_last: replay_last(&object).map_err(reject)?,
            },
            "unsubscribe" => Action::Unsubscribe {
                topic: required_topic(&object).map_err(reject)?,
            },
            "publish" => {
                let topic = required_topic(&object).map_err(reject)?;
                let message = match object.remove("message") {
                    None => {
                        return Err(reject(ProtocolError::invalid("message", "field is required")))
                    }
                    Some(Value::Object(message)) => message,
                    Some(_) => {
                        return Err(reject(ProtocolError::invalid(
                            "message",
                            "must be a JSON object",
                        )))
                    }
                };
                Action::Publish { topic, message }
            }
            "ping" => Action::Ping,
            other => {
                return Err(reject(ProtocolError::invalid(
                    "action",
                    format!("unknown action `{other}`"),
                )))
            }
        };

        Ok(Self { request_id, action })
    }
}

fn required_topic(object: &Map<String, Value>) -> Result<String, ProtocolError> {
    match object.get("topic") {
        None => Err(ProtocolError::invalid("topic", "field is required")),
        Some(Value::String(topic)) if topic.is_empty() => {
            Err(ProtocolError::invalid("topic", "must not be empty"))
        }
        Some(Value::String(topic)) => Ok(topic.clone()),
        Some(_) => Err(ProtocolError::invalid("topic", "must be a string")),
    }
}

fn replay_last(object: &Map<String, Value>) -> Result<usize, ProtocolError> {
    match object.get("replay_last") {
        None | Some(Value::Null) => Ok(0),
        Some(Value::Number(n)) => {
            if let Some(n) = n.as_u64() {
                Ok(usize::try_from(n).unwrap_or(usize::MAX))
            } else if n.as_i64().is_some() {
                Err(ProtocolError::invalid("replay_last", "must not be negative"))
            } else {
                Err(ProtocolError::invalid("replay_last", "must be an integer"))
            }
        }
        Some(_) => Err(ProtocolError::invalid("replay_last", "must be an integer")),
    }
}

/// Error classes reported to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// A topic with that name already exists.
    AlreadyExists,
    /// The topic (or subscription) does not exist.
    NotFound,
    /// The request was malformed or out of range.
    BadRequest,
}

impl ErrorCode {
    /// Wire representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::AlreadyExists => "ALREADY_EXISTS",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::BadRequest => "BAD_REQUEST",
        }
    }
}

/// Error details carried by an error reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Error class.
    pub code: ErrorCode,
    /// Human-readable description.
    pub message: String,
    /// The offending request field, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

/// A frame sent from the server to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Reply {
    /// Sent once when the connection is established.
    Connected {
        /// Server-assigned connection identifier.
        connection_id: String,
        /// Protocol version spoken by the server.
        version: Version,
        /// Maximum number of messages a subscribe can replay.
        history_capacity: usize,
    },

    /// Successful completion of a request.
    Ack {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        topic: Option<String>,
        /// Sequence assigned to a published message.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sequence: Option<u64>,
        /// Number of historical messages replayed by a subscribe.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        replayed: Option<usize>,
    },

    /// A published message delivered to a subscriber.
    Event {
        topic: String,
        sequence: u64,
        /// Milliseconds since the Unix epoch, assigned by the broker.
        timestamp: u64,
        message: Arc<Payload>,
    },

    /// Answer to a ping.
    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },

    /// A request failed.
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        error: ErrorBody,
    },

    /// Out-of-band notification about a topic.
    Info {
        topic: String,
        msg: String,
    },
}

/// `msg` value of the info frame sent when a subscribed topic is deleted.
pub const TOPIC_DELETED: &str = "topic_deleted";

impl Reply {
    /// Create an ack without extra metadata.
    #[must_use]
    pub fn ack(request_id: Option<String>, topic: Option<String>) -> Self {
        Reply::Ack {
            request_id,
            topic,
            sequence: None,
            replayed: None,
        }
    }

    /// Create an error reply.
    #[must_use]
    pub fn error(
        request_id: Option<String>,
        code: ErrorCode,
        message: impl Into<String>,
        field: Option<String>,
    ) -> Self {
        Reply::Error {
            request_id,
            error: ErrorBody {
                code,
                message: message.into(),
                field,
            },
        }
    }

    /// Create the notification sent when a topic is deleted.
    #[must_use]
    pub fn topic_deleted(topic: impl Into<String>) -> Self {
        Reply::Info {
            topic: topic.into(),
            msg: TOPIC_DELETED.to_string(),
        }
    }

    /// Wire name of the frame.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Reply::Connected { .. } => "connected",
            Reply::Ack { .. } => "ack",
            Reply::Event { .. } => "event",
            Reply::Pong { .. } => "pong",
            Reply::Error { .. } => "error",
            Reply::Info { .. } => "info",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn field_of(value: Value) -> Option<&'static str> {
        Request::from_value(value).unwrap_err().error.field()
    }

    #[test]
    fn test_subscribe_defaults_replay_to_zero() {
        let request = Request::from_value(json!({"action": "subscribe", "topic": "orders"}))
            .unwrap();
        assert_eq!(request, Request::subscribe("orders", 0));
    }

    #[test]
    fn test_request_id_is_kept() {
        let request = Request::from_value(json!({
            "action": "ping",
            "request_id": "r-1"
        }))
        .unwrap();
        assert_eq!(request.request_id.as_deref(), Some("r-1"));
        assert_eq!(request.action, Action::Ping);
    }

    #[test]
    fn test_errors_name_the_offending_field() {
        assert_eq!(field_of(json!({"topic": "a"})), Some("action"));
        assert_eq!(field_of(json!({"action": 3})), Some("action"));
        assert_eq!(field_of(json!({"action": "dance"})), Some("action"));
        assert_eq!(field_of(json!({"action": "subscribe"})), Some("topic"));
        assert_eq!(
            field_of(json!({"action": "subscribe", "topic": "a", "replay_last": -1})),
            Some("replay_last")
        );
        assert_eq!(
            field_of(json!({"action": "subscribe", "topic": "a", "replay_last": "ten"})),
            Some("replay_last")
        );
        assert_eq!(
            field_of(json!({"action": "publish", "topic": "a", "message": [1, 2]})),
            Some("message")
        );
        assert_eq!(field_of(json!([1, 2, 3])), Some("$"));
    }

    #[test]
    fn test_malformed_request_keeps_request_id() {
        let malformed = Request::from_value(json!({
            "action": "publish",
            "request_id": 7,
            "topic": "a"
        }))
        .unwrap_err();
        assert_eq!(malformed.request_id.as_deref(), Some("7"));
        assert_eq!(malformed.error.field(), Some("message"));
    }

    #[test]
    fn test_reply_wire_shape() {
        let pong = serde_json::to_value(Reply::Pong { request_id: None }).unwrap();
        assert_eq!(pong, json!({"action": "pong"}));

        let error = serde_json::to_value(Reply::error(
            Some("r-2".into()),
            ErrorCode::NotFound,
            "Topic not found: x",
            None,
        ))
        .unwrap();
        assert_eq!(error["action"], "error");
        assert_eq!(error["error"]["code"], "NOT_FOUND");
        assert_eq!(error["request_id"], "r-2");

        // Only events carry a broker timestamp.
        let info = serde_json::to_value(Reply::topic_deleted("orders")).unwrap();
        assert_eq!(
            info,
            json!({"action": "info", "topic": "orders", "msg": "topic_deleted"})
        );
        let ack = serde_json::to_value(Reply::ack(None, Some("orders".into()))).unwrap();
        assert_eq!(ack, json!({"action": "ack", "topic": "orders"}));
    }

    #[test]
    fn test_action_names() {
        assert_eq!(Request::ping().action.name(), "ping");
        assert_eq!(Request::unsubscribe("t").action.topic(), Some("t"));
        assert_eq!(Request::ping().action.topic(), None);
    }
}
