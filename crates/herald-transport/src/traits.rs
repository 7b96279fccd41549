//! Transport abstraction traits for Herald.
//!
//! A connection is split into a [`FrameSource`] (decoded client requests) and
//! a [`FrameSink`] (encoded server replies) so that reading and writing can
//! run in separate tasks. The server's connection loop only sees these
//! traits.

use async_trait::async_trait;
use herald_protocol::{codec, Encoded, Malformed, ProtocolError, Reply, Request, WireFormat};
use std::fmt;
use thiserror::Error;

/// Unique identifier for a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    /// Create a new connection ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// A reply could not be encoded.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// One inbound frame.
#[derive(Debug)]
pub enum Inbound {
    /// A well-formed request.
    Request(Request),
    /// A frame that did not decode; the connection stays usable.
    Malformed(Malformed),
}

/// The receiving half of a connection.
#[async_trait]
pub trait FrameSource: Send {
    /// Get the connection's unique identifier.
    fn id(&self) -> &ConnectionId;

    /// Receive the next client frame.
    ///
    /// Returns `None` if the connection is closed cleanly.
    async fn recv(&mut self) -> Result<Option<Inbound>, TransportError>;
}

/// The sending half of a connection.
#[async_trait]
pub trait FrameSink: Send {
    /// Get the connection's unique identifier.
    fn id(&self) -> &ConnectionId;

    /// Encoding negotiated for this connection.
    fn format(&self) -> WireFormat;

    /// Encode and send a reply. Returns the encoded size in bytes.
    async fn send(&mut self, reply: &Reply) -> Result<usize, TransportError> {
        let encoded = codec::encode(reply, self.format())?;
        let len = encoded.len();
        self.send_encoded(encoded).await?;
        Ok(len)
    }

    /// Send a pre-encoded frame.
    async fn send_encoded(&mut self, frame: Encoded) -> Result<(), TransportError>;

    /// Close the connection gracefully.
    async fn close(&mut self) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RecordingSink {
        id: ConnectionId,
        format: WireFormat,
        sent: Vec<Encoded>,
    }

    #[async_trait]
    impl FrameSink for RecordingSink {
        fn id(&self) -> &ConnectionId {
            &self.id
        }

        fn format(&self) -> WireFormat {
            self.format
        }

        async fn send_encoded(&mut self, frame: Encoded) -> Result<(), TransportError> {
            self.sent.push(frame);
            Ok(())
        }

        async fn close(&mut self) -> Result<(), TransportError> {
            Ok(())
        }
    }

    #[test]
    fn test_connection_id_from_string() {
        let id: ConnectionId = "test-id".into();
        assert_eq!(id.as_str(), "test-id");
        assert_eq!(id.to_string(), "test-id");
    }

    #[tokio::test]
    async fn test_send_uses_negotiated_format() {
        let reply = Reply::Pong {
            request_id: Some("1".into()),
        };

        let mut json = RecordingSink {
            id: "a".into(),
            format: WireFormat::Json,
            sent: Vec::new(),
        };
        let len = json.send(&reply).await.unwrap();
        assert!(matches!(&json.sent[0], Encoded::Text(text) if text.len() == len));

        let mut msgpack = RecordingSink {
            id: "b".into(),
            format: WireFormat::MessagePack,
            sent: Vec::new(),
        };
        msgpack.send(&reply).await.unwrap();
        let Encoded::Binary(data) = &msgpack.sent[0] else {
            panic!("expected a binary frame");
        };
        assert_eq!(codec::decode_reply_binary(data).unwrap(), reply);
    }
}
