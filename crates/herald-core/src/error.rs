//! Broker error types.

use herald_protocol::ErrorCode;
use thiserror::Error;

/// Errors returned to the caller that issued an action.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    /// A topic with this name already exists.
    #[error("Topic already exists: {0}")]
    AlreadyExists(String),

    /// Topic not found.
    #[error("Topic not found: {0}")]
    NotFound(String),

    /// The request is malformed or out of range.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The session has already been closed.
    #[error("Session closed")]
    SessionClosed,
}

impl BrokerError {
    /// Error class reported on the wire.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            BrokerError::AlreadyExists(_) => ErrorCode::AlreadyExists,
            BrokerError::NotFound(_) => ErrorCode::NotFound,
            BrokerError::InvalidRequest(_) | BrokerError::SessionClosed => ErrorCode::BadRequest,
        }
    }
}

/// A failed hand-off to one subscriber.
///
/// Never surfaced to publishers; the subscriber is detached instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The subscriber's connection is gone.
    #[error("Subscriber closed")]
    Closed,

    /// The subscriber stopped draining its mailbox.
    #[error("Subscriber mailbox overflowed")]
    Overflow,
}
