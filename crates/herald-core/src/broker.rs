//! The broker and its per-connection sessions.
//!
//! [`Broker`] owns the topic registry and exposes the lifecycle operations
//! used by the HTTP layer. Each connection gets a [`Session`], which
//! dispatches that connection's requests and owns its subscriber handle.

use crate::error::{BrokerError, DeliveryError};
use crate::history::HISTORY_CAPACITY;
use crate::registry::{TopicRegistry, TopicSummary, DEFAULT_MAX_TOPICS};
use crate::stats::{BrokerStats, HealthStats, StatsCollector};
use crate::subscriber::{Subscriber, SubscriberId, DEFAULT_MAILBOX_CAPACITY};
use crate::topic::MAX_TOPIC_NAME_LENGTH;
use herald_protocol::{
    Action, ErrorCode, Malformed, Payload, Reply, Request, PROTOCOL_VERSION,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Broker configuration.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Maximum number of topics.
    pub max_topics: usize,
    /// Maximum topic name length in characters.
    pub max_topic_name_length: usize,
    /// Events each subscriber may have queued before the oldest is dropped.
    pub mailbox_capacity: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            max_topics: DEFAULT_MAX_TOPICS,
            max_topic_name_length: MAX_TOPIC_NAME_LENGTH,
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
        }
    }
}

/// The in-memory broker.
pub struct Broker {
    registry: TopicRegistry,
    config: BrokerConfig,
    connections: AtomicUsize,
}

impl Broker {
    /// Create a broker with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(BrokerConfig::default())
    }

    /// Create a broker with custom configuration.
    #[must_use]
    pub fn with_config(config: BrokerConfig) -> Self {
        info!("Creating broker with config: {:?}", config);
        Self {
            registry: TopicRegistry::with_limits(config.max_topics, config.max_topic_name_length),
            config,
            connections: AtomicUsize::new(0),
        }
    }

    /// The topic registry.
    #[must_use]
    pub fn registry(&self) -> &TopicRegistry {
        &self.registry
    }

    /// Broker configuration.
    #[must_use]
    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Create a topic.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` or `InvalidRequest`.
    pub fn create_topic(&self, name: &str) -> Result<(), BrokerError> {
        self.registry.create(name).map(|_| ())
    }

    /// Delete a topic, notifying every subscriber that it is gone.
    ///
    /// Returns the number of subscribers that were detached.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the topic does not exist.
    pub fn delete_topic(&self, name: &str) -> Result<usize, BrokerError> {
        let subscribers = self.registry.delete(name)?;
        for subscriber in &subscribers {
            if let Err(e) = subscriber.notify(Reply::topic_deleted(name)) {
                debug!(subscriber = %subscriber.id(), error = %e, "Could not notify topic deletion");
            }
        }
        Ok(subscribers.len())
    }

    /// List topics with their subscriber counts.
    #[must_use]
    pub fn list_topics(&self) -> Vec<TopicSummary> {
        self.registry.list().collect()
    }

    /// Per-topic statistics.
    #[must_use]
    pub fn stats(&self) -> BrokerStats {
        StatsCollector::new(&self.registry).collect()
    }

    /// Totals for health reporting.
    #[must_use]
    pub fn health(&self) -> HealthStats {
        StatsCollector::new(&self.registry).health(self.connection_count())
    }

    /// Number of open sessions.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }

    /// Open a session for a new connection.
    #[must_use]
    pub fn connect(self: &Arc<Self>) -> Session {
        let subscriber = Subscriber::new(self.config.mailbox_capacity);
        self.connections.fetch_add(1, Ordering::Relaxed);
        debug!(subscriber = %subscriber.id(), "Session opened");
        Session {
            broker: Arc::clone(self),
            subscriber,
            state: SessionState::Connected,
            subscriptions: 0,
        }
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Accepting requests.
    Connected,
    /// Terminal.
    Closed,
}

/// One connection's view of the broker.
///
/// Requests are independent; there is no handshake beyond `Connected`.
/// Dropping a session closes it.
pub struct Session {
    broker: Arc<Broker>,
    subscriber: Arc<Subscriber>,
    state: SessionState,
    subscriptions: u64,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.subscriber.id())
            .field("state", &self.state)
            .finish()
    }
}

impl Session {
    /// The session's subscriber identity.
    #[must_use]
    pub fn id(&self) -> SubscriberId {
        self.subscriber.id()
    }

    /// The subscriber handle; its mailbox is what the connection writer drains.
    #[must_use]
    pub fn subscriber(&self) -> &Arc<Subscriber> {
        &self.subscriber
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Number of subscriptions this session has added. Repeated subscribes
    /// to the same topic are not counted.
    #[must_use]
    pub fn subscriptions_added(&self) -> u64 {
        self.subscriptions
    }

    /// The `connected` frame announcing this session to the client.
    #[must_use]
    pub fn welcome(&self) -> Reply {
        Reply::Connected {
            connection_id: self.id().to_string(),
            version: PROTOCOL_VERSION,
            history_capacity: HISTORY_CAPACITY,
        }
    }

    fn ensure_open(&self) -> Result<(), BrokerError> {
        match self.state {
            SessionState::Connected => Ok(()),
            SessionState::Closed => Err(BrokerError::SessionClosed),
        }
    }

    /// Subscribe to a topic, replaying up to `replay_last` messages first.
    ///
    /// Replayed messages are queued before any live message. Returns the
    /// number of replayed messages.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the topic does not exist.
    pub fn subscribe(&mut self, topic: &str, replay_last: usize) -> Result<usize, BrokerError> {
        self.ensure_open()?;
        let topic = self.broker.registry.get(topic)?;
        let subscribed = topic.subscribe(&self.subscriber, replay_last)?;
        if !subscribed.already_subscribed {
            self.subscriptions += 1;
        }
        Ok(subscribed.replayed)
    }

    /// Stop receiving live messages for a topic.
    ///
    /// Unsubscribing from a topic this session is not subscribed to succeeds
    /// without effect.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the topic does not exist.
    pub fn unsubscribe(&mut self, topic: &str) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let topic = self.broker.registry.get(topic)?;
        if !topic.unsubscribe(self.id()) {
            debug!(topic = %topic.name(), subscriber = %self.id(), "Unsubscribe without subscription");
        }
        Ok(())
    }

    /// Publish a payload, returning its sequence number.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the topic does not exist.
    pub fn publish(&mut self, topic: &str, payload: Payload) -> Result<u64, BrokerError> {
        self.ensure_open()?;
        let topic = self.broker.registry.get(topic)?;
        Ok(topic.publish(payload)?.sequence)
    }

    /// Answer a ping.
    #[must_use]
    pub fn ping(&self, request_id: Option<String>) -> Reply {
        Reply::Pong { request_id }
    }

    /// Execute a request and build its reply.
    pub fn handle(&mut self, request: Request) -> Reply {
        let Request { request_id, action } = request;
        let topic = action.topic().map(str::to_string);

        let outcome = match action {
            Action::Subscribe { topic, replay_last } => {
                self.subscribe(&topic, replay_last).map(|replayed| Reply::Ack {
                    request_id: request_id.clone(),
                    topic: Some(topic),
                    sequence: None,
                    replayed: Some(replayed),
                })
            }
            Action::Unsubscribe { topic } => self
                .unsubscribe(&topic)
                .map(|()| Reply::ack(request_id.clone(), Some(topic))),
            Action::Publish { topic, message } => {
                self.publish(&topic, message).map(|sequence| Reply::Ack {
                    request_id: request_id.clone(),
                    topic: Some(topic),
                    sequence: Some(sequence),
                    replayed: None,
                })
            }
            Action::Ping => self.ensure_open().map(|()| self.ping(request_id.clone())),
        };

        outcome.unwrap_or_else(|e| {
            debug!(subscriber = %self.id(), topic = ?topic, error = %e, "Request failed");
            let field = matches!(e, BrokerError::NotFound(_)).then(|| "topic".to_string());
            Reply::error(request_id, e.code(), e.to_string(), field)
        })
    }

    /// Execute a request and queue its reply behind any replayed messages.
    ///
    /// # Errors
    ///
    /// Returns an error if the reply could not be queued; the connection
    /// should be closed.
    pub fn dispatch(&mut self, request: Request) -> Result<(), DeliveryError> {
        let reply = self.handle(request);
        self.subscriber.notify(reply)
    }

    /// Queue the error reply for a request that failed to decode.
    ///
    /// # Errors
    ///
    /// Returns an error if the reply could not be queued.
    pub fn reject(&self, malformed: Malformed) -> Result<(), DeliveryError> {
        debug!(subscriber = %self.id(), error = %malformed, "Malformed request");
        let field = malformed.error.field().map(str::to_string);
        self.subscriber.notify(Reply::error(
            malformed.request_id,
            ErrorCode::BadRequest,
            malformed.error.to_string(),
            field,
        ))
    }

    /// Close the session, detaching it from every topic. Idempotent.
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Closed;

        let topics = self.subscriber.close();
        for name in &topics {
            // The topic may have been deleted meanwhile; nothing to detach then.
            if let Ok(topic) = self.broker.registry.get(name) {
                topic.unsubscribe(self.id());
            }
        }
        self.broker.connections.fetch_sub(1, Ordering::Relaxed);

        if self.subscriber.dropped() > 0 {
            warn!(
                subscriber = %self.id(),
                dropped = self.subscriber.dropped(),
                "Session closed after dropping events"
            );
        }
        debug!(subscriber = %self.id(), topics = topics.len(), "Session closed");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscriber::Delivery;
    use serde_json::json;

    fn payload(n: u64) -> Payload {
        let mut payload = Payload::new();
        payload.insert("n".into(), json!(n));
        payload
    }

    fn events(session: &Session) -> Vec<u64> {
        std::iter::from_fn(|| session.subscriber().try_recv())
            .filter_map(|d| match d {
                Delivery::Event(m) => m.payload["n"].as_u64(),
                Delivery::Control(_) => None,
            })
            .collect()
    }

    fn replies(session: &Session) -> Vec<Reply> {
        std::iter::from_fn(|| session.subscriber().try_recv())
            .map(Delivery::into_reply)
            .collect()
    }

    #[test]
    fn test_replay_then_live() {
        let broker = Arc::new(Broker::new());
        broker.create_topic("orders").unwrap();

        let mut publisher = broker.connect();
        for n in 1..=150 {
            publisher.publish("orders", payload(n)).unwrap();
        }

        let mut subscriber = broker.connect();
        assert_eq!(subscriber.subscribe("orders", 10).unwrap(), 10);
        publisher.publish("orders", payload(151)).unwrap();

        assert_eq!(events(&subscriber), (141..=151).collect::<Vec<_>>());
    }

    #[test]
    fn test_unsubscribe_stops_delivery_without_backfill() {
        let broker = Arc::new(Broker::new());
        broker.create_topic("t").unwrap();
        let mut publisher = broker.connect();
        let mut session = broker.connect();

        session.subscribe("t", 0).unwrap();
        publisher.publish("t", payload(1)).unwrap();
        session.unsubscribe("t").unwrap();
        publisher.publish("t", payload(2)).unwrap();
        session.subscribe("t", 0).unwrap();
        publisher.publish("t", payload(3)).unwrap();

        assert_eq!(events(&session), vec![1, 3]);
    }

    #[test]
    fn test_unsubscribe_unknown_topic_is_not_found() {
        let broker = Arc::new(Broker::new());
        let mut session = broker.connect();
        assert_eq!(
            session.unsubscribe("nope"),
            Err(BrokerError::NotFound("nope".into()))
        );

        broker.create_topic("t").unwrap();
        // Not subscribed: succeeds without effect.
        assert_eq!(session.unsubscribe("t"), Ok(()));
    }

    #[test]
    fn test_delete_topic_detaches_and_notifies_subscribers() {
        let broker = Arc::new(Broker::new());
        broker.create_topic("t").unwrap();
        let mut sessions: Vec<_> = (0..3).map(|_| broker.connect()).collect();
        for session in &mut sessions {
            session.subscribe("t", 0).unwrap();
        }

        assert_eq!(broker.delete_topic("t").unwrap(), 3);

        for session in &sessions {
            assert!(!session.subscriber().is_subscribed("t"));
            assert_eq!(replies(session), vec![Reply::topic_deleted("t")]);
        }

        let mut publisher = broker.connect();
        assert_eq!(
            publisher.publish("t", payload(1)),
            Err(BrokerError::NotFound("t".into()))
        );
        assert_eq!(
            broker.delete_topic("t"),
            Err(BrokerError::NotFound("t".into()))
        );
    }

    #[test]
    fn test_ping_changes_nothing() {
        let broker = Arc::new(Broker::new());
        broker.create_topic("t").unwrap();
        let mut session = broker.connect();
        session.subscribe("t", 0).unwrap();
        session.publish("t", payload(1)).unwrap();
        let _ = replies(&session);
        let before = broker.stats();

        let reply = session.handle(Request::ping().with_request_id("p"));
        assert_eq!(
            reply,
            Reply::Pong {
                request_id: Some("p".into())
            }
        );
        assert_eq!(broker.stats(), before);
        assert!(replies(&session).is_empty());
    }

    #[test]
    fn test_handle_builds_acks_and_errors() {
        let broker = Arc::new(Broker::new());
        broker.create_topic("t").unwrap();
        let mut session = broker.connect();

        let reply = session.handle(Request::publish("t", payload(1)).with_request_id("a"));
        assert_eq!(
            reply,
            Reply::Ack {
                request_id: Some("a".into()),
                topic: Some("t".into()),
                sequence: Some(1),
                replayed: None,
            }
        );

        let reply = session.handle(Request::subscribe("missing", 0));
        let Reply::Error { error, .. } = reply else {
            panic!("expected an error reply");
        };
        assert_eq!(error.code, ErrorCode::NotFound);
        assert_eq!(error.field.as_deref(), Some("topic"));
    }

    #[test]
    fn test_dispatch_queues_ack_after_replay() {
        let broker = Arc::new(Broker::new());
        broker.create_topic("t").unwrap();
        let mut session = broker.connect();
        session.publish("t", payload(1)).unwrap();
        session.publish("t", payload(2)).unwrap();

        session
            .dispatch(Request::subscribe("t", 5).with_request_id("s"))
            .unwrap();

        let names: Vec<_> = replies(&session).iter().map(Reply::name).collect();
        assert_eq!(names, vec!["event", "event", "ack"]);
    }

    #[test]
    fn test_close_detaches_everywhere_and_is_idempotent() {
        let broker = Arc::new(Broker::new());
        broker.create_topic("a").unwrap();
        broker.create_topic("b").unwrap();
        let mut session = broker.connect();
        session.subscribe("a", 0).unwrap();
        session.subscribe("b", 0).unwrap();
        assert_eq!(broker.connection_count(), 1);

        session.close();
        session.close();

        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(broker.connection_count(), 0);
        assert_eq!(broker.registry().get("a").unwrap().subscriber_count(), 0);
        assert_eq!(broker.registry().get("b").unwrap().subscriber_count(), 0);
        assert_eq!(session.subscribe("a", 0), Err(BrokerError::SessionClosed));
    }

    #[test]
    fn test_dropping_session_cleans_up() {
        let broker = Arc::new(Broker::new());
        broker.create_topic("a").unwrap();
        {
            let mut session = broker.connect();
            session.subscribe("a", 0).unwrap();
            assert_eq!(broker.list_topics()[0].subscriber_count, 1);
        }
        assert_eq!(broker.list_topics()[0].subscriber_count, 0);
        assert_eq!(broker.connection_count(), 0);
    }

    #[test]
    fn test_slow_subscriber_does_not_block_others() {
        let broker = Arc::new(Broker::with_config(BrokerConfig {
            mailbox_capacity: 4,
            ..BrokerConfig::default()
        }));
        broker.create_topic("t").unwrap();
        let mut slow = broker.connect();
        let mut fast = broker.connect();
        slow.subscribe("t", 0).unwrap();
        fast.subscribe("t", 0).unwrap();

        let mut publisher = broker.connect();
        let mut fast_seen = Vec::new();
        for n in 1..=20 {
            publisher.publish("t", payload(n)).unwrap();
            fast_seen.extend(events(&fast));
        }

        assert_eq!(fast_seen, (1..=20).collect::<Vec<_>>());
        assert_eq!(events(&slow), vec![17, 18, 19, 20]);
        assert_eq!(slow.subscriber().dropped(), 16);
    }

    #[test]
    fn test_replay_count_matches_what_fits_in_the_mailbox() {
        let broker = Arc::new(Broker::with_config(BrokerConfig {
            mailbox_capacity: 4,
            ..BrokerConfig::default()
        }));
        broker.create_topic("t").unwrap();
        let mut publisher = broker.connect();
        for n in 1..=150 {
            publisher.publish("t", payload(n)).unwrap();
        }

        let mut session = broker.connect();
        let reply = session.handle(Request::subscribe("t", 10));
        match reply {
            Reply::Ack { replayed, .. } => assert_eq!(replayed, Some(4)),
            other => panic!("expected an ack, got {:?}", other),
        }
        assert_eq!(events(&session), vec![147, 148, 149, 150]);
    }

    #[test]
    fn test_repeated_subscribe_is_counted_once() {
        let broker = Arc::new(Broker::new());
        broker.create_topic("a").unwrap();
        broker.create_topic("b").unwrap();
        let mut session = broker.connect();

        session.subscribe("a", 0).unwrap();
        session.subscribe("a", 0).unwrap();
        assert_eq!(session.subscriptions_added(), 1);

        session.subscribe("b", 0).unwrap();
        assert_eq!(session.subscriptions_added(), 2);
    }

    #[test]
    fn test_subscribe_racing_publish_misses_nothing() {
        const MESSAGES: u64 = 500;

        for _ in 0..50 {
            let broker = Arc::new(Broker::new());
            broker.create_topic("t").unwrap();

            let mut publisher = broker.connect();
            let handle = std::thread::spawn(move || {
                for n in 1..=MESSAGES {
                    publisher.publish("t", payload(n)).unwrap();
                }
            });

            let mut session = broker.connect();
            session.subscribe("t", HISTORY_CAPACITY).unwrap();
            handle.join().unwrap();

            let seen = events(&session);
            let first = *seen.first().expect("replay or live events");
            assert_eq!(seen, (first..=MESSAGES).collect::<Vec<_>>());
            assert!(first <= MESSAGES - HISTORY_CAPACITY as u64 + 1);
        }
    }
}
