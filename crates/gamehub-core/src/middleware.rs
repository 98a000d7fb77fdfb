//! Standard middleware.
//!
//! Each middleware either answers the request itself or hands it on with
//! [`Next::run`]. [`RouterBuilder::with_standard_middleware`] installs them
//! in the order they appear here.
//!
//! [`RouterBuilder::with_standard_middleware`]: crate::router::RouterBuilder::with_standard_middleware

use async_trait::async_trait;
use gamehub_protocol::{action, category, Message, Response, ResponseCode};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::rate_limit::RateLimiter;
use crate::router::{Next, RequestContext, Route};

/// A step in the request pipeline.
#[async_trait]
pub trait Middleware: Send + Sync + 'static {
    async fn process(&self, ctx: &RequestContext, msg: &Message, next: Next<'_>) -> Response;
}

/// Rejects messages missing a category, action or correlation id.
#[derive(Debug, Default, Clone, Copy)]
pub struct Validation;

#[async_trait]
impl Middleware for Validation {
    async fn process(&self, ctx: &RequestContext, msg: &Message, next: Next<'_>) -> Response {
        let missing = if msg.category.is_empty() {
            Some("category")
        } else if msg.action.is_empty() {
            Some("action")
        } else if msg.correlation_id.is_empty() {
            Some("correlationId")
        } else {
            None
        };

        match missing {
            Some(field) => {
                debug!(connection = %ctx.connection_id(), field, "Invalid message");
                Response::error(
                    msg.correlation_id.as_str(),
                    ResponseCode::BadRequest,
                    format!("missing {field}"),
                )
            }
            None => next.run(ctx, msg).await,
        }
    }
}

/// Routes reachable without logging in.
#[derive(Debug, Clone)]
pub struct AuthPolicy {
    public: Vec<Route>,
}

impl AuthPolicy {
    pub fn new(public: impl IntoIterator<Item = Route>) -> Self {
        Self {
            public: public.into_iter().collect(),
        }
    }

    #[must_use]
    pub fn is_public(&self, msg: &Message) -> bool {
        self.public.iter().any(|route| route.matches(msg))
    }
}

impl Default for AuthPolicy {
    fn default() -> Self {
        Self::new([
            Route::new(category::AUTH, action::LOGIN),
            Route::new(category::AUTH, action::REGISTER),
            Route::new(category::HEARTBEAT, action::PING),
        ])
    }
}

/// Requires an authenticated connection for every non-public route.
#[derive(Debug, Clone, Default)]
pub struct Authentication {
    policy: AuthPolicy,
}

impl Authentication {
    pub fn new(policy: AuthPolicy) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl Middleware for Authentication {
    async fn process(&self, ctx: &RequestContext, msg: &Message, next: Next<'_>) -> Response {
        if self.policy.is_public(msg) || ctx.is_authenticated() {
            return next.run(ctx, msg).await;
        }

        warn!(
            connection = %ctx.connection_id(),
            category = %msg.category,
            action = %msg.action,
            "Unauthenticated request rejected"
        );
        Response::error(
            msg.correlation_id.as_str(),
            ResponseCode::Unauthorized,
            "authentication required",
        )
    }
}

/// Logs every request with its outcome and duration.
#[derive(Debug, Default, Clone, Copy)]
pub struct RequestLogging;

#[async_trait]
impl Middleware for RequestLogging {
    async fn process(&self, ctx: &RequestContext, msg: &Message, next: Next<'_>) -> Response {
        let start = Instant::now();
        debug!(
            connection = %ctx.connection_id(),
            user = ?ctx.user_id(),
            category = %msg.category,
            action = %msg.action,
            correlation_id = %msg.correlation_id,
            "Request received"
        );

        let response = next.run(ctx, msg).await;
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

        if response.is_success() {
            info!(
                connection = %ctx.connection_id(),
                category = %msg.category,
                action = %msg.action,
                elapsed_ms,
                "Request completed"
            );
        } else {
            warn!(
                connection = %ctx.connection_id(),
                category = %msg.category,
                action = %msg.action,
                code = %response.code(),
                message = response.message(),
                elapsed_ms,
                "Request failed"
            );
        }
        response
    }
}

/// Applies the per-connection request ceiling.
#[derive(Debug, Clone)]
pub struct RateLimit {
    limiter: Arc<RateLimiter>,
}

impl RateLimit {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self { limiter }
    }
}

#[async_trait]
impl Middleware for RateLimit {
    async fn process(&self, ctx: &RequestContext, msg: &Message, next: Next<'_>) -> Response {
        if self.limiter.is_allowed(ctx.connection_id().as_str()) {
            return next.run(ctx, msg).await;
        }

        warn!(
            connection = %ctx.connection_id(),
            category = %msg.category,
            action = %msg.action,
            "Rate limit exceeded"
        );
        Response::error(
            msg.correlation_id.as_str(),
            ResponseCode::RateLimited,
            "rate limit exceeded",
        )
    }
}
