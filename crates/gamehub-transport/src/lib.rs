//! # gamehub-transport
//!
//! Transport abstraction layer for the Gamehub realtime server.
//!
//! A session works against two traits:
//!
//! - [`FrameSource`] - the read half, consumed by the inbound loop
//! - [`FrameSink`] - the write half, owned by the outbound loop
//!
//! Implementations:
//!
//! - **WebSocket** - axum upgraded sockets (`websocket` feature, default)
//! - **Memory** - channel-backed duplex for tests and benchmarks
//!
//! ```rust,ignore
//! use gamehub_transport::{FrameSource, WireFrame};
//!
//! async fn drain(mut source: impl FrameSource) {
//!     while let Ok(Some(frame)) = source.recv().await {
//!         // Process frame
//!     }
//! }
//! ```

pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use traits::{ConnectionId, FrameSink, FrameSource, TransportError, WireFrame};

#[cfg(feature = "websocket")]
pub use websocket::{split_websocket, WebSocketSink, WebSocketSource};
