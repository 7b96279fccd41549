//! # herald-transport
//!
//! Transport abstraction layer for the Herald broker.
//!
//! Connections are handed to the server as two halves:
//!
//! - **FrameSource** - Yields decoded client requests (or decode failures)
//! - **FrameSink** - Encodes and sends server replies
//!
//! The WebSocket implementation is behind the default `websocket` feature.
//!
//! ```rust,ignore
//! use herald_transport::{FrameSource, Inbound};
//!
//! async fn read_loop(mut source: impl FrameSource) {
//!     while let Ok(Some(inbound)) = source.recv().await {
//!         // Dispatch request
//!     }
//! }
//! ```

pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use traits::{ConnectionId, FrameSink, FrameSource, Inbound, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConfig, WebSocketSink, WebSocketSource};
