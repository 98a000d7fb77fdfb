//! Shared fixtures for the Gamehub benchmarks.

use async_trait::async_trait;
use gamehub_core::{
    handler_fn, handlers, Authenticator, Connection, Hub, HubConfig, LoginOutcome,
    MessageRouter, NoopOnlineStatus, RateLimitConfig, RateLimiter, RequestContext, ServiceError,
    UserId,
};
use gamehub_protocol::Message;
use gamehub_transport::{ConnectionId, WireFrame};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Accepts any login, using `payload.userId` (default 1).
pub struct OpenAccounts;

#[async_trait]
impl Authenticator for OpenAccounts {
    async fn login(&self, credentials: &Value) -> Result<LoginOutcome, ServiceError> {
        let user_id = credentials["userId"].as_u64().unwrap_or(1);
        Ok(LoginOutcome {
            user_id: UserId(user_id),
            profile: Value::Null,
        })
    }

    async fn register(&self, _details: &Value) -> Result<Value, ServiceError> {
        Ok(Value::Null)
    }
}

/// A hub with the standard middleware, the built-in handlers and a
/// `bench:echo` route. The rate limit is high enough not to interfere.
#[must_use]
pub fn hub(config: HubConfig) -> Hub {
    let limiter = Arc::new(RateLimiter::with_config(RateLimitConfig {
        max_requests: usize::MAX,
        ..RateLimitConfig::default()
    }));
    let router = handlers::install(
        MessageRouter::builder().with_standard_middleware(limiter.clone()),
        Arc::new(OpenAccounts),
    )
    .route(
        "bench",
        "echo",
        handler_fn(|_ctx, msg: Message| async move { Ok::<_, ServiceError>(msg.payload) }),
    )
    .build();
    Hub::new(config, router, limiter, Arc::new(NoopOnlineStatus))
}

/// Register a fresh connection on `hub`.
#[must_use]
pub fn connect(hub: &Hub, capacity: usize) -> (RequestContext, mpsc::Receiver<WireFrame>) {
    let (conn, rx) = Connection::new(ConnectionId::generate(), capacity);
    hub.register(conn.clone());
    (RequestContext::new(hub.clone(), conn), rx)
}

#[must_use]
pub fn ping(correlation_id: &str) -> Message {
    Message::new("heartbeat", "ping", correlation_id)
}
