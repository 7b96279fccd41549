//! # herald-protocol
//!
//! Wire protocol definitions for the Herald pub/sub broker.
//!
//! Clients talk to the broker over a persistent connection using
//! JSON-shaped frames tagged by an `action` field:
//!
//! - `subscribe` / `unsubscribe` - Topic membership, with optional replay
//! - `publish` - Send an opaque JSON object to a topic
//! - `ping` - Keepalive, answered by `pong`
//!
//! The server answers with `ack`, `error`, `pong`, and pushes `event` and
//! `info` frames.
//!
//! ## Example
//!
//! ```rust
//! use herald_protocol::{codec, Action, Request, WireFormat};
//!
//! let request = codec::decode_text(
//!     r#"{"action":"subscribe","topic":"orders","replay_last":5}"#,
//!     codec::MAX_FRAME_SIZE,
//! )
//! .unwrap();
//! assert!(matches!(request.action, Action::Subscribe { replay_last: 5, .. }));
//!
//! let encoded = codec::encode_request(&Request::ping(), WireFormat::Json).unwrap();
//! assert!(!encoded.is_empty());
//! ```

pub mod codec;
pub mod frames;
pub mod version;

pub use codec::{decode_binary, decode_text, encode, Encoded, Malformed, ProtocolError, WireFormat};
pub use frames::{Action, ErrorBody, ErrorCode, Payload, Reply, Request, TOPIC_DELETED};
pub use version::{Version, PROTOCOL_VERSION};
