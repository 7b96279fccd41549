//! Topic abstraction for Herald.
//!
//! A topic owns its history buffer and its subscriber set behind a single
//! lock. Subscribe, unsubscribe and publish on the same topic are therefore
//! totally ordered, which is what makes replay hand-off exact: a subscriber
//! receives the replay snapshot and then every message published after it,
//! with nothing missing and nothing twice.
//!
//! Fan-out happens under the lock but only enqueues into subscriber
//! mailboxes; no network I/O is performed while the lock is held.

use crate::error::{BrokerError, DeliveryError};
use crate::history::{HistoryBuffer, HISTORY_CAPACITY};
use crate::message::Message;
use crate::subscriber::{Subscriber, SubscriberId};
use herald_protocol::Payload;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// Default maximum topic name length.
pub const MAX_TOPIC_NAME_LENGTH: usize = 100;

/// Validate a topic name.
///
/// # Errors
///
/// Returns an error message if the topic name is invalid.
pub fn validate_topic_name(name: &str, max_length: usize) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("Topic name cannot be empty");
    }
    if name.chars().count() > max_length {
        return Err("Topic name too long");
    }
    if name.starts_with('$') {
        return Err("Topic names starting with '$' are reserved");
    }
    if !name.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
        return Err("Topic name contains invalid characters");
    }
    Ok(())
}

/// Result of a subscribe call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscribed {
    /// Number of historical messages queued before live delivery.
    pub replayed: usize,
    /// The subscriber was already attached; nothing changed.
    pub already_subscribed: bool,
}

/// Result of a publish call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Published {
    /// Sequence number assigned to the message.
    pub sequence: u64,
    /// Subscribers the message was queued for.
    pub delivered: usize,
    /// Subscribers that were found closed and detached.
    pub detached: usize,
}

struct TopicState {
    history: HistoryBuffer,
    subscribers: HashMap<SubscriberId, Arc<Subscriber>>,
    published: u64,
    closed: bool,
}

/// A named topic.
///
/// Counters are mirrored into atomics while the lock is held so that
/// statistics can be read without contending with publishers.
pub struct Topic {
    name: String,
    state: Mutex<TopicState>,
    published: AtomicU64,
    subscriber_count: AtomicUsize,
    history_len: AtomicUsize,
}

impl std::fmt::Debug for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Topic")
            .field("name", &self.name)
            .field("published", &self.published_count())
            .field("subscribers", &self.subscriber_count())
            .finish_non_exhaustive()
    }
}

impl Topic {
    /// Create an empty topic.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(TopicState {
                history: HistoryBuffer::new(),
                subscribers: HashMap::new(),
                published: 0,
                closed: false,
            }),
            published: AtomicU64::new(0),
            subscriber_count: AtomicUsize::new(0),
            history_len: AtomicUsize::new(0),
        }
    }

    /// Get the topic name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Attach a subscriber and queue up to `replay_last` historical messages.
    ///
    /// `replay_last` is clamped to the history capacity. Subscribing twice is
    /// a no-op that replays nothing.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the topic was deleted and `SessionClosed` if the
    /// subscriber is already closed.
    pub fn subscribe(
        &self,
        subscriber: &Arc<Subscriber>,
        replay_last: usize,
    ) -> Result<Subscribed, BrokerError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(BrokerError::NotFound(self.name.clone()));
        }

        if state.subscribers.contains_key(&subscriber.id()) {
            return Ok(Subscribed {
                replayed: 0,
                already_subscribed: true,
            });
        }

        subscriber
            .attach(&self.name)
            .map_err(|_| BrokerError::SessionClosed)?;
        state
            .subscribers
            .insert(subscriber.id(), Arc::clone(subscriber));
        self.subscriber_count
            .store(state.subscribers.len(), Ordering::Relaxed);

        let replay = state.history.replay(replay_last.min(HISTORY_CAPACITY));
        let replayed = subscriber.deliver_replay(replay).unwrap_or(0);

        debug!(
            topic = %self.name,
            subscriber = %subscriber.id(),
            replayed,
            subscribers = state.subscribers.len(),
            "Subscribed"
        );

        Ok(Subscribed {
            replayed,
            already_subscribed: false,
        })
    }

    /// Detach a subscriber.
    ///
    /// Returns `true` if the subscriber was attached.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut state = self.state.lock();
        let Some(subscriber) = state.subscribers.remove(&id) else {
            return false;
        };
        subscriber.detach(&self.name);
        self.subscriber_count
            .store(state.subscribers.len(), Ordering::Relaxed);

        debug!(
            topic = %self.name,
            subscriber = %id,
            subscribers = state.subscribers.len(),
            "Unsubscribed"
        );
        true
    }

    /// Append a message to history and queue it for every current subscriber.
    ///
    /// Subscribers found closed during fan-out are detached once the lock is
    /// released; that never fails the publish.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the topic was deleted.
    pub fn publish(&self, payload: impl Into<Arc<Payload>>) -> Result<Published, BrokerError> {
        let (published, failed) = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(BrokerError::NotFound(self.name.clone()));
            }

            state.published += 1;
            let sequence = state.published;
            let message = Arc::new(Message::new(self.name.clone(), sequence, payload));

            state.history.append(Arc::clone(&message));
            self.published.store(sequence, Ordering::Relaxed);
            self.history_len
                .store(state.history.size(), Ordering::Relaxed);

            let mut delivered = 0;
            let mut failed = Vec::new();
            for (id, subscriber) in &state.subscribers {
                match subscriber.deliver(Arc::clone(&message)) {
                    Ok(()) => delivered += 1,
                    Err(DeliveryError::Closed | DeliveryError::Overflow) => failed.push(*id),
                }
            }

            (
                Published {
                    sequence,
                    delivered,
                    detached: failed.len(),
                },
                failed,
            )
        };

        for id in failed {
            trace!(topic = %self.name, subscriber = %id, "Detaching closed subscriber");
            self.unsubscribe(id);
        }

        trace!(
            topic = %self.name,
            sequence = published.sequence,
            recipients = published.delivered,
            "Published message"
        );
        Ok(published)
    }

    /// Mark the topic deleted and detach every subscriber.
    ///
    /// Returns the subscribers that were attached. Later subscribe and publish
    /// calls on this topic fail with `NotFound`.
    pub fn close(&self) -> Vec<Arc<Subscriber>> {
        let mut state = self.state.lock();
        state.closed = true;
        let subscribers: Vec<_> = state.subscribers.drain().map(|(_, s)| s).collect();
        for subscriber in &subscribers {
            subscriber.detach(&self.name);
        }
        self.subscriber_count.store(0, Ordering::Relaxed);
        debug!(topic = %self.name, detached = subscribers.len(), "Topic closed");
        subscribers
    }

    /// The last `n` messages of history, oldest first.
    #[must_use]
    pub fn history(&self, n: usize) -> Vec<Arc<Message>> {
        self.state.lock().history.replay(n)
    }

    /// Check if a subscriber is attached.
    #[must_use]
    pub fn is_subscribed(&self, id: SubscriberId) -> bool {
        self.state.lock().subscribers.contains_key(&id)
    }

    /// Whether the topic has been deleted.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Total messages ever published. Never blocks.
    #[must_use]
    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Current number of subscribers. Never blocks.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscriber_count.load(Ordering::Relaxed)
    }

    /// Current history occupancy. Never blocks.
    #[must_use]
    pub fn history_len(&self) -> usize {
        self.history_len.load(Ordering::Relaxed)
    }
}
