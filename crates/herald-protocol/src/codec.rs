//! Codec for encoding and decoding Herald frames.
//!
//! Text frames carry JSON. Binary frames carry MessagePack with the same
//! shape, so both encodings go through one validation path.

use bytes::Bytes;
use serde_json::Value;
use thiserror::Error;

use crate::frames::{Reply, Request};

/// Default maximum frame size (1 MiB).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds the configured maximum size.
    #[error("Frame size {size} exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    /// Text frame is not valid JSON.
    #[error("Malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// MessagePack encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// A request field is missing or has the wrong shape.
    #[error("Invalid field `{field}`: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

impl ProtocolError {
    /// Create an invalid-field error.
    #[must_use]
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ProtocolError::InvalidField {
            field,
            reason: reason.into(),
        }
    }

    /// The request field this error is about, if it is about one.
    #[must_use]
    pub fn field(&self) -> Option<&'static str> {
        match self {
            ProtocolError::InvalidField { field, .. } => Some(field),
            _ => None,
        }
    }
}

/// A request that could not be decoded.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct Malformed {
    /// Correlation id, if it could be recovered.
    pub request_id: Option<String>,
    /// What was wrong.
    #[source]
    pub error: ProtocolError,
}

impl From<ProtocolError> for Malformed {
    fn from(error: ProtocolError) -> Self {
        Self {
            request_id: None,
            error,
        }
    }
}

/// Encoding used on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum WireFormat {
    /// JSON in text frames.
    #[default]
    Json,
    /// MessagePack in binary frames.
    MessagePack,
}

impl WireFormat {
    /// Parse a `format` query value. Unknown values fall back to JSON.
    #[must_use]
    pub fn from_query(value: Option<&str>) -> Self {
        match value.map(str::to_ascii_lowercase).as_deref() {
            Some("msgpack") | Some("messagepack") => WireFormat::MessagePack,
            _ => WireFormat::Json,
        }
    }
}

/// An encoded frame ready to hand to a transport.
#[derive(Debug, Clone, PartialEq)]
pub enum Encoded {
    /// A text frame.
    Text(String),
    /// A binary frame.
    Binary(Bytes),
}

impl Encoded {
    /// Size of the encoded frame in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Encoded::Text(text) => text.len(),
            Encoded::Binary(data) => data.len(),
        }
    }

    /// Whether the encoded frame is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn check_size(size: usize, max: usize) -> Result<(), ProtocolError> {
    if size > max {
        return Err(ProtocolError::FrameTooLarge { size, max });
    }
    Ok(())
}

/// Decode a request from a JSON text frame.
///
/// # Errors
///
/// Returns an error if the frame is too large, not JSON, or not a valid request.
pub fn decode_text(text: &str, max_size: usize) -> Result<Request, Malformed> {
    check_size(text.len(), max_size)?;
    let value: Value = serde_json::from_str(text).map_err(ProtocolError::from)?;
    Request::from_value(value)
}

/// Decode a request from a MessagePack binary frame.
///
/// # Errors
///
/// Returns an error if the frame is too large, not MessagePack, or not a valid request.
pub fn decode_binary(data: &[u8], max_size: usize) -> Result<Request, Malformed> {
    check_size(data.len(), max_size)?;
    let value: Value = rmp_serde::from_slice(data).map_err(ProtocolError::from)?;
    Request::from_value(value)
}

/// Encode a reply in the given format.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode(reply: &Reply, format: WireFormat) -> Result<Encoded, ProtocolError> {
    match format {
        WireFormat::Json => Ok(Encoded::Text(serde_json::to_string(reply)?)),
        WireFormat::MessagePack => Ok(Encoded::Binary(Bytes::from(rmp_serde::to_vec_named(
            reply,
        )?))),
    }
}

/// Encode a request in the given format. Used by clients and tests.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_request(request: &Request, format: WireFormat) -> Result<Encoded, ProtocolError> {
    match format {
        WireFormat::Json => Ok(Encoded::Text(serde_json::to_string(request)?)),
        WireFormat::MessagePack => Ok(Encoded::Binary(Bytes::from(rmp_serde::to_vec_named(
            request,
        )?))),
    }
}

/// Decode a reply from a text frame. Used by clients and tests.
///
/// # Errors
///
/// Returns an error if the text is not a valid reply.
pub fn decode_reply_text(text: &str) -> Result<Reply, ProtocolError> {
    Ok(serde_json::from_str(text)?)
}

/// Decode a reply from a binary frame. Used by clients and tests.
///
/// # Errors
///
/// Returns an error if the data is not a valid reply.
pub fn decode_reply_binary(data: &[u8]) -> Result<Reply, ProtocolError> {
    Ok(rmp_serde::from_slice(data)?)
}
