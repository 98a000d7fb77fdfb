//! Per-client connection state.
//!
//! A [`Connection`] is shared between the hub, the inbound loop and the
//! outbound loop. Everything on it is behind atomics or short-lived locks, so
//! any of them can observe or close it without coordination.

use gamehub_protocol::{codec, Encoding, ProtocolError, Response};
use gamehub_transport::{ConnectionId, WireFrame};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Notify};
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::Instant;
use tracing::debug;

use crate::service::UserId;

/// Lifecycle of a connection. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnectionState {
    Connecting = 0,
    Open = 1,
    Authenticated = 2,
    Closed = 3,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Open,
            2 => ConnectionState::Authenticated,
            _ => ConnectionState::Closed,
        }
    }
}

/// Why a frame could not be queued.
#[derive(Debug, Error)]
pub enum EnqueueError {
    /// The outbound queue is at capacity.
    #[error("Outbound queue full")]
    Full,

    /// The outbound queue was closed.
    #[error("Outbound queue closed")]
    Closed,

    #[error("Encoding failed: {0}")]
    Encode(#[from] ProtocolError),
}

/// One live client.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    user: RwLock<Option<UserId>>,
    state: AtomicU8,
    outbound: Mutex<Option<mpsc::Sender<WireFrame>>>,
    closed: Notify,
    close_requested: AtomicBool,
    binary: AtomicBool,
    created_at: Instant,
    /// Milliseconds after `created_at` of the last inbound frame.
    last_seen_ms: AtomicU64,
}

impl Connection {
    /// Create a connection with an outbound queue of `capacity` frames.
    ///
    /// The receiver is drained by the session's outbound loop.
    #[must_use]
    pub fn new(id: ConnectionId, capacity: usize) -> (Arc<Self>, mpsc::Receiver<WireFrame>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let conn = Arc::new(Self {
            id,
            user: RwLock::new(None),
            state: AtomicU8::new(ConnectionState::Connecting as u8),
            outbound: Mutex::new(Some(tx)),
            closed: Notify::new(),
            close_requested: AtomicBool::new(false),
            binary: AtomicBool::new(false),
            created_at: Instant::now(),
            last_seen_ms: AtomicU64::new(0),
        });
        (conn, rx)
    }

    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// The bound user, if the connection is authenticated.
    #[must_use]
    pub fn user_id(&self) -> Option<UserId> {
        *self.user.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn replace_user(&self, user: Option<UserId>) -> Option<UserId> {
        let mut slot = self.user.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *slot, user)
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move to `to` unless already closed.
    pub(crate) fn set_state(&self, to: ConnectionState) {
        let _ = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current != ConnectionState::Closed as u8).then_some(to as u8)
            });
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state() == ConnectionState::Closed
    }

    fn sender(&self) -> MutexGuard<'_, Option<mpsc::Sender<WireFrame>>> {
        self.outbound.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a frame without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`EnqueueError::Full`] when the queue is at capacity and
    /// [`EnqueueError::Closed`] once the connection was closed.
    pub fn enqueue(&self, frame: WireFrame) -> Result<(), EnqueueError> {
        let sender = self.sender();
        let tx = sender.as_ref().ok_or(EnqueueError::Closed)?;
        tx.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => EnqueueError::Full,
            TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }

    /// Encode and queue a response.
    ///
    /// # Errors
    ///
    /// See [`Connection::enqueue`]; also fails if the response cannot be
    /// encoded.
    pub fn enqueue_response(
        &self,
        response: &Response,
        encoding: Encoding,
    ) -> Result<(), EnqueueError> {
        let frame = match encoding {
            Encoding::Text => WireFrame::Text(codec::encode_text(response)?),
            Encoding::Binary => WireFrame::Binary(codec::encode_binary(response)?),
        };
        self.enqueue(frame)
    }

    /// Close the outbound queue.
    ///
    /// Frames already queued are still delivered. Returns `true` only for
    /// the call that actually closed it.
    pub fn close(&self) -> bool {
        let closed = self.sender().take().is_some();
        if closed {
            self.state
                .store(ConnectionState::Closed as u8, Ordering::Release);
            self.closed.notify_one();
            debug!(connection = %self.id, "Outbound queue closed");
        }
        closed
    }

    /// Resolves once [`Connection::close`] has been called.
    ///
    /// Intended for a single waiter, the session's inbound loop.
    pub async fn closed(&self) {
        if self.is_closed() {
            return;
        }
        self.closed.notified().await;
    }

    /// Ask the session to end after the current reply is flushed.
    pub fn request_close(&self) {
        self.close_requested.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn close_requested(&self) -> bool {
        self.close_requested.load(Ordering::Acquire)
    }

    /// Encoding of the most recent request, used for unsolicited notices.
    #[must_use]
    pub fn encoding(&self) -> Encoding {
        if self.binary.load(Ordering::Relaxed) {
            Encoding::Binary
        } else {
            Encoding::Text
        }
    }

    pub(crate) fn set_encoding(&self, encoding: Encoding) {
        self.binary
            .store(encoding == Encoding::Binary, Ordering::Relaxed);
    }

    /// Record inbound activity.
    pub fn touch(&self) {
        let elapsed = u64::try_from(self.created_at.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.last_seen_ms.store(elapsed, Ordering::Relaxed);
    }

    /// Time since the last inbound frame, or since creation if none.
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        let last_seen = Duration::from_millis(self.last_seen_ms.load(Ordering::Relaxed));
        self.created_at.elapsed().saturating_sub(last_seen)
    }

    /// Time since the connection was created.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}
