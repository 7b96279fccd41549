//! The topic registry.
//!
//! Maps topic names to topics. Create and delete are atomic on the map: a
//! create uses the entry API (insert-if-absent) and a delete is a single
//! remove, so concurrent lifecycle calls cannot lose updates. Map shard locks
//! are only held for the lookup itself, never while a topic lock is taken.

use crate::error::BrokerError;
use crate::subscriber::Subscriber;
use crate::topic::{validate_topic_name, Topic, MAX_TOPIC_NAME_LENGTH};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

/// Default maximum number of topics.
pub const DEFAULT_MAX_TOPICS: usize = 10_000;

/// One entry of a topic listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicSummary {
    /// Topic name.
    pub name: String,
    /// Subscribers at the time the entry was read.
    pub subscriber_count: usize,
}

/// Registry of live topics.
pub struct TopicRegistry {
    topics: DashMap<String, Arc<Topic>>,
    max_topics: usize,
    max_name_length: usize,
}

impl TopicRegistry {
    /// Create a registry with default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MAX_TOPICS, MAX_TOPIC_NAME_LENGTH)
    }

    /// Create a registry with explicit limits.
    #[must_use]
    pub fn with_limits(max_topics: usize, max_name_length: usize) -> Self {
        Self {
            topics: DashMap::new(),
            max_topics,
            max_name_length,
        }
    }

    /// Create an empty topic.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` if the name is taken, or `InvalidRequest` if
    /// the name is invalid or the topic limit is reached.
    pub fn create(&self, name: &str) -> Result<Arc<Topic>, BrokerError> {
        validate_topic_name(name, self.max_name_length)
            .map_err(|reason| BrokerError::InvalidRequest(reason.to_string()))?;

        // Soft limit: racing creates may overshoot by the number of racers.
        if self.topics.len() >= self.max_topics {
            return Err(BrokerError::InvalidRequest(
                "Maximum number of topics reached".to_string(),
            ));
        }

        match self.topics.entry(name.to_string()) {
            Entry::Occupied(_) => Err(BrokerError::AlreadyExists(name.to_string())),
            Entry::Vacant(vacant) => {
                let topic = Arc::new(Topic::new(name));
                vacant.insert(Arc::clone(&topic));
                info!(topic = %name, "Topic created");
                Ok(topic)
            }
        }
    }

    /// Remove a topic and detach its subscribers.
    ///
    /// Returns the subscribers that were attached so the caller can notify
    /// them.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the topic does not exist.
    pub fn delete(&self, name: &str) -> Result<Vec<Arc<Subscriber>>, BrokerError> {
        let (_, topic) = self
            .topics
            .remove(name)
            .ok_or_else(|| BrokerError::NotFound(name.to_string()))?;

        let subscribers = topic.close();
        info!(topic = %name, subscribers = subscribers.len(), "Topic deleted");
        Ok(subscribers)
    }

    /// Look up a topic.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the topic does not exist.
    pub fn get(&self, name: &str) -> Result<Arc<Topic>, BrokerError> {
        self.topics
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| {
                debug!(topic = %name, "Lookup of unknown topic");
                BrokerError::NotFound(name.to_string())
            })
    }

    /// Check if a topic exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.topics.contains_key(name)
    }

    /// Lazily list topics with their subscriber counts.
    ///
    /// Each entry is read at the moment the iterator reaches it; the listing
    /// as a whole is not a snapshot. Call again to restart.
    pub fn list(&self) -> impl Iterator<Item = TopicSummary> + '_ {
        self.topics.iter().map(|entry| TopicSummary {
            name: entry.key().clone(),
            subscriber_count: entry.value().subscriber_count(),
        })
    }

    /// Snapshot of all topics.
    #[must_use]
    pub fn topics(&self) -> Vec<Arc<Topic>> {
        self.topics
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Number of topics.
    #[must_use]
    pub fn len(&self) -> usize {
        self.topics.len()
    }

    /// Whether there are no topics.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}

impl Default for TopicRegistry {
    fn default() -> Self {
        Self::new()
    }
}
