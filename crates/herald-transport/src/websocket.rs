//! WebSocket transport implementation.
//!
//! Wraps an upgraded axum [`WebSocket`]. Text frames carry JSON and binary
//! frames carry MessagePack; both are accepted on every connection. Replies
//! use the format chosen at upgrade time.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use herald_protocol::{codec, Encoded, WireFormat};
use tracing::{debug, warn};

use crate::traits::{ConnectionId, FrameSink, FrameSource, Inbound, TransportError};

/// WebSocket transport configuration.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Maximum inbound message size in bytes.
    pub max_message_size: usize,
    /// Encoding of outbound replies.
    pub format: WireFormat,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            max_message_size: codec::MAX_FRAME_SIZE,
            format: WireFormat::Json,
        }
    }
}

/// Split an upgraded socket into its sending and receiving halves.
#[must_use]
pub fn split(
    socket: WebSocket,
    id: ConnectionId,
    config: &WebSocketConfig,
) -> (WebSocketSink, WebSocketSource) {
    let (sink, stream) = socket.split();
    (
        WebSocketSink {
            id: id.clone(),
            sink,
            format: config.format,
            is_open: true,
        },
        WebSocketSource {
            id,
            stream,
            max_message_size: config.max_message_size,
        },
    )
}

/// Receiving half of a WebSocket connection.
pub struct WebSocketSource {
    id: ConnectionId,
    stream: SplitStream<WebSocket>,
    max_message_size: usize,
}

#[async_trait]
impl FrameSource for WebSocketSource {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    async fn recv(&mut self) -> Result<Option<Inbound>, TransportError> {
        loop {
            let decoded = match self.stream.next().await {
                Some(Ok(Message::Text(text))) => codec::decode_text(&text, self.max_message_size),
                Some(Ok(Message::Binary(data))) => {
                    codec::decode_binary(&data, self.max_message_size)
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                    // Control frames are answered by the socket itself.
                    continue;
                }
                Some(Ok(Message::Close(_))) => {
                    debug!(connection = %self.id, "Received close frame");
                    return Ok(None);
                }
                Some(Err(e)) => {
                    warn!(connection = %self.id, error = %e, "WebSocket error");
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
                None => {
                    debug!(connection = %self.id, "WebSocket stream ended");
                    return Ok(None);
                }
            };

            return Ok(Some(match decoded {
                Ok(request) => Inbound::Request(request),
                Err(malformed) => Inbound::Malformed(malformed),
            }));
        }
    }
}

/// Sending half of a WebSocket connection.
pub struct WebSocketSink {
    id: ConnectionId,
    sink: SplitSink<WebSocket, Message>,
    format: WireFormat,
    is_open: bool,
}

#[async_trait]
impl FrameSink for WebSocketSink {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    fn format(&self) -> WireFormat {
        self.format
    }

    async fn send_encoded(&mut self, frame: Encoded) -> Result<(), TransportError> {
        if !self.is_open {
            return Err(TransportError::ConnectionClosed);
        }

        let message = match frame {
            Encoded::Text(text) => Message::Text(text),
            Encoded::Binary(data) => Message::Binary(data.to_vec()),
        };
        self.sink.send(message).await.map_err(|e| {
            self.is_open = false;
            TransportError::SendFailed(e.to_string())
        })
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !self.is_open {
            return Ok(());
        }
        self.is_open = false;

        self.sink
            .send(Message::Close(None))
            .await
            .map_err(|e| TransportError::SendFailed(format!("Failed to close: {}", e)))
    }
}
