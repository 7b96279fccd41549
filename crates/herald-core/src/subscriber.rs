//! Subscriber handles and their outbound mailboxes.
//!
//! Every live connection owns one [`Subscriber`]. Fan-out never writes to the
//! network: it pushes into the subscriber's bounded mailbox and returns. The
//! connection's writer task drains the mailbox with [`Subscriber::recv`].
//!
//! Overflow policy:
//! - events: when the mailbox is full the oldest queued event is dropped
//! - control frames (acks, errors, pongs, info): never dropped; a mailbox
//!   holding more than twice its capacity marks the subscriber as failed

use crate::error::DeliveryError;
use crate::message::Message;
use herald_protocol::Reply;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, trace, warn};

/// Default mailbox capacity.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 1024;

static NEXT_SUBSCRIBER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a subscriber handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Allocate a process-unique id.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_SUBSCRIBER_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value.
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn_{:x}", self.0)
    }
}

/// An item waiting in a mailbox.
#[derive(Debug, Clone)]
pub enum Delivery {
    /// A published message.
    Event(Arc<Message>),
    /// A reply or notification that must not be dropped.
    Control(Reply),
}

impl Delivery {
    /// Convert into the frame sent on the wire.
    #[must_use]
    pub fn into_reply(self) -> Reply {
        match self {
            Delivery::Event(message) => message.to_reply(),
            Delivery::Control(reply) => reply,
        }
    }
}

struct MailboxState {
    queue: VecDeque<Delivery>,
    closed: bool,
}

/// One connection's interest in topics, plus its outbound queue.
pub struct Subscriber {
    id: SubscriberId,
    /// Topic names this handle currently receives live messages for.
    topics: Mutex<HashSet<String>>,
    mailbox: Mutex<MailboxState>,
    capacity: usize,
    notify: Notify,
    dropped: AtomicU64,
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("id", &self.id)
            .field("capacity", &self.capacity)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Subscriber {
    /// Create a subscriber with a mailbox of the given capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            id: SubscriberId::next(),
            topics: Mutex::new(HashSet::new()),
            mailbox: Mutex::new(MailboxState {
                queue: VecDeque::with_capacity(capacity.min(DEFAULT_MAILBOX_CAPACITY)),
                closed: false,
            }),
            capacity: capacity.max(1),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
        })
    }

    /// The subscriber's identity.
    #[must_use]
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Topics this subscriber is attached to.
    #[must_use]
    pub fn topics(&self) -> Vec<String> {
        self.topics.lock().iter().cloned().collect()
    }

    /// Check if the subscriber is attached to a topic.
    #[must_use]
    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.topics.lock().contains(topic)
    }

    /// Record a topic as subscribed.
    ///
    /// Fails once the subscriber is closed so that a concurrent close can
    /// never miss a topic. Called with the topic lock held.
    pub(crate) fn attach(&self, topic: &str) -> Result<(), DeliveryError> {
        let mut topics = self.topics.lock();
        if self.is_closed() {
            return Err(DeliveryError::Closed);
        }
        topics.insert(topic.to_string());
        Ok(())
    }

    /// Forget a topic. Called with the topic lock held.
    pub(crate) fn detach(&self, topic: &str) -> bool {
        self.topics.lock().remove(topic)
    }

    /// Queue a published message, dropping the oldest event if full.
    ///
    /// # Errors
    ///
    /// Returns an error if the subscriber is closed.
    pub fn deliver(&self, message: Arc<Message>) -> Result<(), DeliveryError> {
        let mut mailbox = self.mailbox.lock();
        if mailbox.closed {
            return Err(DeliveryError::Closed);
        }

        self.push_event(&mut mailbox, message);
        self.check_overflow(mailbox)
    }

    /// Queue a replay batch, oldest first.
    ///
    /// Returns how many of the batch are still queued afterwards. When the
    /// batch does not fit, its own oldest entries are the ones dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the subscriber is closed or has overflowed.
    pub fn deliver_replay(&self, messages: Vec<Arc<Message>>) -> Result<usize, DeliveryError> {
        let mut mailbox = self.mailbox.lock();
        if mailbox.closed {
            return Err(DeliveryError::Closed);
        }

        let queued_before = mailbox
            .queue
            .iter()
            .filter(|d| matches!(d, Delivery::Event(_)))
            .count();
        let total = messages.len();
        let mut evicted: usize = 0;
        for message in messages {
            if self.push_event(&mut mailbox, message) {
                evicted += 1;
            }
        }

        // Eviction takes the oldest event, so earlier events go first.
        let lost = evicted.saturating_sub(queued_before);
        self.check_overflow(mailbox)?;
        Ok(total - lost)
    }

    /// Push an event, evicting the oldest queued event when full.
    ///
    /// Returns `true` if an event was evicted.
    fn push_event(&self, mailbox: &mut MailboxState, message: Arc<Message>) -> bool {
        let mut evicted = false;
        if mailbox.queue.len() >= self.capacity {
            let oldest_event = mailbox
                .queue
                .iter()
                .position(|d| matches!(d, Delivery::Event(_)));
            if let Some(index) = oldest_event {
                mailbox.queue.remove(index);
                self.dropped.fetch_add(1, Ordering::Relaxed);
                trace!(subscriber = %self.id, "Dropped oldest event");
                evicted = true;
            }
        }
        mailbox.queue.push_back(Delivery::Event(message));
        evicted
    }

    /// Queue a control frame. Control frames are never dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the subscriber is closed or has overflowed.
    pub fn notify(&self, reply: Reply) -> Result<(), DeliveryError> {
        let mut mailbox = self.mailbox.lock();
        if mailbox.closed {
            return Err(DeliveryError::Closed);
        }
        mailbox.queue.push_back(Delivery::Control(reply));
        self.check_overflow(mailbox)
    }

    fn check_overflow(
        &self,
        mut mailbox: parking_lot::MutexGuard<'_, MailboxState>,
    ) -> Result<(), DeliveryError> {
        if mailbox.queue.len() > self.capacity * 2 {
            mailbox.closed = true;
            mailbox.queue.clear();
            drop(mailbox);
            warn!(subscriber = %self.id, capacity = self.capacity, "Mailbox overflowed, closing subscriber");
            self.notify.notify_one();
            return Err(DeliveryError::Overflow);
        }
        drop(mailbox);
        self.notify.notify_one();
        Ok(())
    }

    /// Wait for the next queued item.
    ///
    /// Returns `None` once the subscriber is closed; anything still queued at
    /// that point is discarded.
    pub async fn recv(&self) -> Option<Delivery> {
        loop {
            {
                let mut mailbox = self.mailbox.lock();
                if mailbox.closed {
                    return None;
                }
                if let Some(delivery) = mailbox.queue.pop_front() {
                    return Some(delivery);
                }
            }
            // `notify_one` stores a permit when nobody is waiting, so a push
            // between the check above and this await is not lost.
            self.notify.notified().await;
        }
    }

    /// Take the next queued item without waiting.
    #[must_use]
    pub fn try_recv(&self) -> Option<Delivery> {
        let mut mailbox = self.mailbox.lock();
        if mailbox.closed {
            return None;
        }
        mailbox.queue.pop_front()
    }

    /// Close the mailbox and return the topics the subscriber was attached to.
    ///
    /// The returned set is emptied from the handle; the caller is responsible
    /// for removing the handle from those topics. Returns an empty list if the
    /// subscriber was already closed and detached.
    pub fn close(&self) -> Vec<String> {
        let mut topics = self.topics.lock();
        {
            let mut mailbox = self.mailbox.lock();
            if !mailbox.closed {
                mailbox.closed = true;
                mailbox.queue.clear();
                debug!(subscriber = %self.id, "Subscriber closed");
            }
        }
        self.notify.notify_one();
        topics.drain().collect()
    }

    /// Whether the subscriber has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.mailbox.lock().closed
    }

    /// Number of items waiting in the mailbox.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.mailbox.lock().queue.len()
    }

    /// Number of events dropped because the mailbox was full.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Mailbox capacity for events.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
