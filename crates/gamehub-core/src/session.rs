//! Per-connection read and write loops.
//!
//! [`serve`] owns one client from registration to cleanup. The inbound loop
//! runs on the caller's task and dispatches each message in turn; the
//! outbound loop runs on its own task and is the only writer to the sink.

use bytes::Bytes;
use gamehub_protocol::{codec, Encoding, Response, ResponseCode};
use gamehub_transport::{ConnectionId, FrameSink, FrameSource, WireFrame};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tracing::{debug, error, warn};

use crate::connection::{Connection, EnqueueError};
use crate::hub::{Hub, HubConfig};
use crate::router::RequestContext;

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer sent a close frame or ended the stream.
    ClientClosed,
    /// No inbound frame within the idle timeout.
    IdleTimeout,
    /// Reading from the transport failed.
    Transport(String),
    /// The outbound queue was full.
    QueueFull,
    /// The client logged out.
    Logout,
    /// The connection was closed elsewhere, e.g. by a newer login or a
    /// failed write.
    Closed,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::ClientClosed => write!(f, "client closed"),
            CloseReason::IdleTimeout => write!(f, "idle timeout"),
            CloseReason::Transport(e) => write!(f, "transport error: {e}"),
            CloseReason::QueueFull => write!(f, "outbound queue full"),
            CloseReason::Logout => write!(f, "logout"),
            CloseReason::Closed => write!(f, "closed"),
        }
    }
}

/// Run a session over an already established transport.
///
/// Returns once the connection is unregistered and the outbound loop has
/// finished.
pub async fn serve<S, K>(hub: Hub, source: S, sink: K) -> CloseReason
where
    S: FrameSource,
    K: FrameSink + 'static,
{
    serve_with_id(hub, ConnectionId::generate(), source, sink).await
}

/// [`serve`] with a caller-chosen connection id.
pub async fn serve_with_id<S, K>(hub: Hub, id: ConnectionId, mut source: S, sink: K) -> CloseReason
where
    S: FrameSource,
    K: FrameSink + 'static,
{
    let config = hub.config().clone();
    let (conn, outbound) = Connection::new(id, config.outbound_queue_capacity);
    hub.register(conn.clone());

    let writer = tokio::spawn(write_loop(conn.clone(), outbound, sink, config.clone()));
    let reason = read_loop(&hub, &conn, &mut source, &config).await;

    debug!(
        connection = %conn.id(),
        reason = %reason,
        lifetime_ms = u64::try_from(conn.age().as_millis()).unwrap_or(u64::MAX),
        "Session ended"
    );
    hub.unregister(&conn).await;

    if let Err(e) = writer.await {
        error!(connection = %conn.id(), error = %e, "Outbound task failed");
    }
    reason
}

async fn read_loop<S: FrameSource>(
    hub: &Hub,
    conn: &Arc<Connection>,
    source: &mut S,
    config: &HubConfig,
) -> CloseReason {
    loop {
        let received = tokio::select! {
            biased;
            () = conn.closed() => return CloseReason::Closed,
            received = time::timeout(config.idle_timeout, source.recv()) => received,
        };

        let frame = match received {
            Err(_) => {
                debug!(connection = %conn.id(), idle = ?conn.idle_for(), "Idle timeout");
                return CloseReason::IdleTimeout;
            }
            Ok(Err(e)) => {
                warn!(connection = %conn.id(), error = %e, "Transport read failed");
                return CloseReason::Transport(e.to_string());
            }
            Ok(Ok(None)) | Ok(Ok(Some(WireFrame::Close))) => return CloseReason::ClientClosed,
            Ok(Ok(Some(frame))) => frame,
        };
        conn.touch();

        let encoding = match &frame {
            WireFrame::Text(_) => Encoding::Text,
            WireFrame::Binary(_) => Encoding::Binary,
            _ => continue,
        };
        conn.set_encoding(encoding);

        let response = if frame.len() > config.max_message_size {
            warn!(
                connection = %conn.id(),
                size = frame.len(),
                limit = config.max_message_size,
                "Message too large"
            );
            Response::error("", ResponseCode::BadRequest, "message too large")
        } else {
            let decoded = match &frame {
                WireFrame::Binary(data) => codec::decode_binary(data),
                WireFrame::Text(text) => codec::decode_text(text),
                _ => continue,
            };
            match decoded {
                Ok(msg) => {
                    let ctx = RequestContext::new(hub.clone(), conn.clone());
                    hub.router().dispatch(&ctx, &msg).await
                }
                Err(e) => {
                    debug!(connection = %conn.id(), error = %e, "Malformed message");
                    Response::error("", ResponseCode::BadRequest, "malformed message")
                }
            }
        };

        if let Err(reason) = reply(conn, &response, encoding) {
            return reason;
        }

        if conn.close_requested() {
            return CloseReason::Logout;
        }
    }
}

/// Queue `response`, falling back to an internal error carrying the same
/// correlation id when it cannot be encoded.
fn reply(conn: &Connection, response: &Response, encoding: Encoding) -> Result<(), CloseReason> {
    let result = match conn.enqueue_response(response, encoding) {
        Err(EnqueueError::Encode(e)) => {
            error!(
                connection = %conn.id(),
                correlation_id = response.correlation_id(),
                error = %e,
                "Failed to encode response"
            );
            let fallback = Response::error(
                response.correlation_id(),
                ResponseCode::Internal,
                "internal server error",
            )
            .stamped();
            conn.enqueue_response(&fallback, encoding)
        }
        other => other,
    };

    match result {
        Ok(()) => Ok(()),
        Err(EnqueueError::Full) => {
            warn!(connection = %conn.id(), "Outbound queue full, closing session");
            Err(CloseReason::QueueFull)
        }
        Err(EnqueueError::Closed) => Err(CloseReason::Closed),
        Err(EnqueueError::Encode(e)) => {
            error!(connection = %conn.id(), error = %e, "Failed to encode error response");
            Ok(())
        }
    }
}

async fn write_loop<K: FrameSink>(
    conn: Arc<Connection>,
    mut outbound: mpsc::Receiver<WireFrame>,
    mut sink: K,
    config: HubConfig,
) {
    // A zero interval disables keep-alive pings.
    let pinging = !config.keepalive_interval.is_zero();
    let period = if pinging {
        config.keepalive_interval
    } else {
        Duration::from_secs(3600)
    };
    let mut keepalive = time::interval_at(Instant::now() + period, period);
    keepalive.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

    loop {
        let (frame, last) = tokio::select! {
            queued = outbound.recv() => match queued {
                Some(frame) => (frame, false),
                None => (WireFrame::Close, true),
            },
            _ = keepalive.tick(), if pinging => (WireFrame::Ping(Bytes::new()), false),
        };

        match time::timeout(config.write_timeout, sink.send(frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(connection = %conn.id(), error = %e, "Write failed");
                break;
            }
            Err(_) => {
                warn!(connection = %conn.id(), timeout = ?config.write_timeout, "Write timed out");
                break;
            }
        }

        if last {
            break;
        }
    }

    conn.close();
    if let Err(e) = sink.close().await {
        debug!(connection = %conn.id(), error = %e, "Sink close failed");
    }
}
