//! Broker statistics.
//!
//! Collection reads only the atomics each topic mirrors, so it never waits on
//! a publisher. Values for different topics are read at slightly different
//! moments; the result is consistent per topic, not across topics.

use crate::registry::TopicRegistry;
use crate::topic::Topic;
use serde::Serialize;
use std::collections::BTreeMap;

/// Statistics of one topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicStats {
    /// Current subscriber count.
    pub subscribers: usize,
    /// Messages ever published.
    pub messages_published: u64,
    /// Messages currently retained for replay.
    pub messages_in_history: usize,
}

impl From<&Topic> for TopicStats {
    fn from(topic: &Topic) -> Self {
        Self {
            subscribers: topic.subscriber_count(),
            messages_published: topic.published_count(),
            messages_in_history: topic.history_len(),
        }
    }
}

/// Statistics of every topic, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BrokerStats {
    pub topics: BTreeMap<String, TopicStats>,
}

/// Totals reported by health checks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HealthStats {
    /// Number of topics.
    pub topics: usize,
    /// Sum of subscriber counts over all topics.
    pub subscribers: usize,
    /// Open sessions.
    pub connections: usize,
}

/// Reads statistics from a registry.
pub struct StatsCollector<'a> {
    registry: &'a TopicRegistry,
}

impl<'a> StatsCollector<'a> {
    #[must_use]
    pub fn new(registry: &'a TopicRegistry) -> Self {
        Self { registry }
    }

    /// Statistics of every topic.
    #[must_use]
    pub fn collect(&self) -> BrokerStats {
        let topics = self
            .registry
            .topics()
            .iter()
            .map(|topic| (topic.name().to_string(), TopicStats::from(topic.as_ref())))
            .collect();
        BrokerStats { topics }
    }

    /// Totals for health reporting.
    #[must_use]
    pub fn health(&self, connections: usize) -> HealthStats {
        let topics = self.registry.topics();
        HealthStats {
            topics: topics.len(),
            subscribers: topics.iter().map(|t| t.subscriber_count()).sum(),
            connections,
        }
    }
}
