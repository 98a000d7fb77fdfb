//! WebSocket transport implementation.
//!
//! Adapts an upgraded axum [`WebSocket`] into the [`FrameSource`] /
//! [`FrameSink`] halves used by a session.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, warn};

use crate::traits::{FrameSink, FrameSource, TransportError, WireFrame};

/// Read half of a WebSocket.
pub struct WebSocketSource {
    inner: SplitStream<WebSocket>,
    max_message_size: usize,
}

/// Write half of a WebSocket.
pub struct WebSocketSink {
    inner: SplitSink<WebSocket, Message>,
}

/// Split an upgraded WebSocket into session halves.
///
/// Messages larger than `max_message_size` are reported as receive errors.
#[must_use]
pub fn split_websocket(
    socket: WebSocket,
    max_message_size: usize,
) -> (WebSocketSource, WebSocketSink) {
    let (sink, stream) = socket.split();
    (
        WebSocketSource {
            inner: stream,
            max_message_size,
        },
        WebSocketSink { inner: sink },
    )
}

fn check_size(len: usize, max: usize) -> Result<(), TransportError> {
    if len > max {
        warn!("Message too large: {} bytes (max: {})", len, max);
        return Err(TransportError::ReceiveFailed(format!(
            "message of {len} bytes exceeds limit {max}"
        )));
    }
    Ok(())
}

#[async_trait]
impl FrameSource for WebSocketSource {
    async fn recv(&mut self) -> Result<Option<WireFrame>, TransportError> {
        match self.inner.next().await {
            Some(Ok(Message::Text(text))) => {
                check_size(text.len(), self.max_message_size)?;
                Ok(Some(WireFrame::Text(text)))
            }
            Some(Ok(Message::Binary(data))) => {
                check_size(data.len(), self.max_message_size)?;
                Ok(Some(WireFrame::Binary(Bytes::from(data))))
            }
            Some(Ok(Message::Ping(data))) => Ok(Some(WireFrame::Ping(Bytes::from(data)))),
            Some(Ok(Message::Pong(data))) => Ok(Some(WireFrame::Pong(Bytes::from(data)))),
            Some(Ok(Message::Close(frame))) => {
                debug!(reason = ?frame, "Received close frame");
                Ok(Some(WireFrame::Close))
            }
            Some(Err(e)) => Err(TransportError::ReceiveFailed(e.to_string())),
            None => {
                debug!("WebSocket stream ended");
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl FrameSink for WebSocketSink {
    async fn send(&mut self, frame: WireFrame) -> Result<(), TransportError> {
        let message = match frame {
            WireFrame::Text(text) => Message::Text(text),
            WireFrame::Binary(data) => Message::Binary(data.to_vec()),
            WireFrame::Ping(data) => Message::Ping(data.to_vec()),
            WireFrame::Pong(data) => Message::Pong(data.to_vec()),
            WireFrame::Close => Message::Close(None),
        };
        self.inner
            .send(message)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.inner
            .close()
            .await
            .map_err(|e| TransportError::SendFailed(format!("Failed to close: {}", e)))
    }
}
