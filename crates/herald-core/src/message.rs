//! Published messages.

use herald_protocol::{Payload, Reply};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
#[must_use]
fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A message stored in a topic's history and fanned out to subscribers.
///
/// Messages are immutable once published and shared behind an `Arc`, so one
/// allocation serves the history buffer and every subscriber mailbox.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Topic the message was published to.
    pub topic: String,
    /// The topic's publish counter at the time of publication, starting at 1.
    pub sequence: u64,
    /// Broker-assigned publication time in milliseconds since the epoch.
    pub timestamp: u64,
    /// Opaque publisher payload.
    pub payload: Arc<Payload>,
}

impl Message {
    /// Create a message stamped with the current time.
    #[must_use]
    pub fn new(topic: impl Into<String>, sequence: u64, payload: impl Into<Arc<Payload>>) -> Self {
        Self {
            topic: topic.into(),
            sequence,
            timestamp: now_millis(),
            payload: payload.into(),
        }
    }

    /// The `event` frame that carries this message to a subscriber.
    #[must_use]
    pub fn to_reply(&self) -> Reply {
        Reply::Event {
            topic: self.topic.clone(),
            sequence: self.sequence,
            timestamp: self.timestamp,
            message: Arc::clone(&self.payload),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_reply_shares_payload() {
        let mut payload = Payload::new();
        payload.insert("id".into(), json!(1));
        let message = Message::new("orders", 3, payload);

        let Reply::Event {
            topic,
            sequence,
            message: body,
            ..
        } = message.to_reply()
        else {
            panic!("expected an event frame");
        };
        assert_eq!(topic, "orders");
        assert_eq!(sequence, 3);
        assert!(Arc::ptr_eq(&body, &message.payload));
    }

    #[test]
    fn test_timestamp_is_assigned() {
        let message = Message::new("t", 1, Payload::new());
        assert!(message.timestamp > 0);
    }
}
