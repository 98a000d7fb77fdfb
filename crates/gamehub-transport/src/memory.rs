//! In-memory transport.
//!
//! [`duplex`] returns the server-side halves of a connection together with a
//! [`MemoryClient`] that plays the peer. Used to drive sessions in tests and
//! benchmarks without opening sockets.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::traits::{FrameSink, FrameSource, TransportError, WireFrame};

type Inbound = Result<WireFrame, TransportError>;

/// Server read half fed by a [`MemoryClient`].
pub struct MemorySource {
    rx: mpsc::Receiver<Inbound>,
}

/// Server write half drained by a [`MemoryClient`].
pub struct MemorySink {
    tx: Option<mpsc::Sender<WireFrame>>,
}

/// The peer end of an in-memory connection.
pub struct MemoryClient {
    tx: Option<mpsc::Sender<Inbound>>,
    rx: mpsc::Receiver<WireFrame>,
}

/// Create an in-memory connection whose channels hold `capacity` frames in
/// each direction.
#[must_use]
pub fn duplex(capacity: usize) -> (MemorySource, MemorySink, MemoryClient) {
    let (client_tx, server_rx) = mpsc::channel(capacity);
    let (server_tx, client_rx) = mpsc::channel(capacity);
    (
        MemorySource { rx: server_rx },
        MemorySink {
            tx: Some(server_tx),
        },
        MemoryClient {
            tx: Some(client_tx),
            rx: client_rx,
        },
    )
}

#[async_trait]
impl FrameSource for MemorySource {
    async fn recv(&mut self) -> Result<Option<WireFrame>, TransportError> {
        match self.rx.recv().await {
            Some(Ok(frame)) => Ok(Some(frame)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send(&mut self, frame: WireFrame) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::ConnectionClosed)?;
        tx.send(frame)
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.tx = None;
        Ok(())
    }
}

impl MemoryClient {
    /// Send a frame to the server.
    ///
    /// # Errors
    ///
    /// Returns an error once the server has stopped reading.
    pub async fn send(&self, frame: WireFrame) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::ConnectionClosed)?;
        tx.send(Ok(frame))
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Send a text frame.
    ///
    /// # Errors
    ///
    /// Returns an error once the server has stopped reading.
    pub async fn send_text(&self, text: impl Into<String>) -> Result<(), TransportError> {
        self.send(WireFrame::Text(text.into())).await
    }

    /// Make the server's next read fail with a transport error.
    ///
    /// # Errors
    ///
    /// Returns an error once the server has stopped reading.
    pub async fn inject_error(&self) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::ConnectionClosed)?;
        tx.send(Err(TransportError::ReceiveFailed("injected".into())))
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Receive the next frame written by the server.
    ///
    /// Returns `None` once the server closed its write half.
    pub async fn recv(&mut self) -> Option<WireFrame> {
        self.rx.recv().await
    }

    /// Receive the next text frame, skipping keep-alive pings.
    pub async fn recv_text(&mut self) -> Option<String> {
        loop {
            match self.rx.recv().await? {
                WireFrame::Text(text) => return Some(text),
                WireFrame::Ping(_) | WireFrame::Pong(_) => continue,
                _ => return None,
            }
        }
    }

    /// End the stream as a clean disconnect.
    pub fn disconnect(&mut self) {
        self.tx = None;
    }
}
