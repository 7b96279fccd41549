//! # herald-core
//!
//! Topics, history and message routing for the Herald broker.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Topic** - Named stream with its own sequence counter and history
//! - **HistoryBuffer** - Ring of the last 100 messages used for replay
//! - **TopicRegistry** - Concurrent map of live topics
//! - **Broker** / **Session** - Action dispatch for one connection
//! - **StatsCollector** - Lock-free per-topic statistics
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   Session   │────▶│  Registry   │────▶│    Topic    │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        ▲                                       │
//!        │            ┌─────────────┐            │
//!        └────────────│ Subscriber  │◀───────────┘
//!          recv()     │  (mailbox)  │   fan-out
//!                     └─────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use herald_core::Broker;
//! use herald_protocol::{Payload, Request};
//! use std::sync::Arc;
//!
//! let broker = Arc::new(Broker::new());
//! broker.create_topic("orders").unwrap();
//!
//! let mut session = broker.connect();
//! let reply = session.handle(Request::publish("orders", Payload::new()));
//! assert_eq!(reply.name(), "ack");
//! ```

pub mod broker;
pub mod error;
pub mod history;
pub mod message;
pub mod registry;
pub mod stats;
pub mod subscriber;
pub mod topic;

pub use broker::{Broker, BrokerConfig, Session, SessionState};
pub use error::{BrokerError, DeliveryError};
pub use history::{HistoryBuffer, HISTORY_CAPACITY};
pub use message::Message;
pub use registry::{TopicRegistry, TopicSummary};
pub use stats::{BrokerStats, HealthStats, StatsCollector, TopicStats};
pub use subscriber::{Delivery, Subscriber, SubscriberId};
pub use topic::{Topic, MAX_TOPIC_NAME_LENGTH};
