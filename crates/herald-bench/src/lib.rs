//! Shared fixtures for the Herald benchmarks.

use herald_core::{Broker, BrokerConfig, Session};
use herald_protocol::Payload;
use serde_json::Value;
use std::sync::Arc;

/// A payload whose `data` field is `bytes` long.
#[must_use]
pub fn payload(bytes: usize) -> Payload {
    let mut payload = Payload::new();
    payload.insert("data".into(), Value::String("x".repeat(bytes)));
    payload
}

/// A broker with one topic and `subscribers` sessions attached to it.
///
/// The sessions must be kept alive for as long as the subscriptions should
/// last.
#[must_use]
pub fn broker_with_subscribers(
    topic: &str,
    subscribers: usize,
    mailbox_capacity: usize,
) -> (Arc<Broker>, Vec<Session>) {
    let broker = Arc::new(Broker::with_config(BrokerConfig {
        mailbox_capacity,
        ..BrokerConfig::default()
    }));
    if let Err(e) = broker.create_topic(topic) {
        panic!("failed to create benchmark topic {}: {}", topic, e);
    }

    let sessions = (0..subscribers)
        .map(|_| {
            let mut session = broker.connect();
            if let Err(e) = session.subscribe(topic, 0) {
                panic!("failed to subscribe to {}: {}", topic, e);
            }
            session
        })
        .collect();
    (broker, sessions)
}

/// Empty a session's mailbox, returning how many items were queued.
pub fn drain(session: &Session) -> usize {
    std::iter::from_fn(|| session.subscriber().try_recv()).count()
}
