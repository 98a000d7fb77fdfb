//! Message router for Gamehub.
//!
//! Requests are addressed by a [`Route`] and pass through an ordered
//! middleware chain before reaching their [`Handler`]. The handler table is
//! built once by a [`RouterBuilder`] and never changes afterwards.
//!
//! ```text
//!   dispatch ─▶ layer(s) ─▶ Validation ─▶ Authentication ─▶ RequestLogging
//!                                                              │
//!                           handler table  ◀─ RateLimit  ◀─────┘
//! ```

use async_trait::async_trait;
use futures_util::FutureExt;
use gamehub_protocol::{Message, Response, ResponseCode};
use gamehub_transport::ConnectionId;
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::connection::Connection;
use crate::hub::Hub;
use crate::middleware::{
    AuthPolicy, Authentication, Middleware, RateLimit, RequestLogging, Validation,
};
use crate::rate_limit::RateLimiter;
use crate::service::{ServiceError, UserId};

/// A `(category, action)` pair addressing one handler.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Route {
    pub category: String,
    pub action: String,
}

impl Route {
    pub fn new(category: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            action: action.into(),
        }
    }

    /// Whether `msg` is addressed to this route.
    #[must_use]
    pub fn matches(&self, msg: &Message) -> bool {
        self.category == msg.category && self.action == msg.action
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.category, self.action)
    }
}

/// Per-request view of the calling connection.
#[derive(Clone)]
pub struct RequestContext {
    hub: Hub,
    connection: Arc<Connection>,
}

impl RequestContext {
    pub fn new(hub: Hub, connection: Arc<Connection>) -> Self {
        Self { hub, connection }
    }

    #[must_use]
    pub fn connection_id(&self) -> &ConnectionId {
        self.connection.id()
    }

    #[must_use]
    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    #[must_use]
    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    #[must_use]
    pub fn user_id(&self) -> Option<UserId> {
        self.connection.user_id()
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.user_id().is_some()
    }

    /// The authenticated user, for handlers that need one.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Unauthorized`] if the connection is not
    /// logged in.
    pub fn require_user(&self) -> Result<UserId, ServiceError> {
        self.user_id()
            .ok_or_else(|| ServiceError::Unauthorized("authentication required".into()))
    }

    /// Bind this connection to `user`.
    ///
    /// # Errors
    ///
    /// Fails if the connection has already been closed.
    pub async fn authenticate(&self, user: UserId) -> Result<(), ServiceError> {
        self.hub.associate_user(user, &self.connection).await
    }

    /// Unbind the user and end the session once the reply is sent.
    pub async fn logout(&self) -> Option<UserId> {
        let user = self.hub.release_user(&self.connection).await;
        self.connection.request_close();
        user
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("connection", self.connection.id())
            .field("user", &self.user_id())
            .finish()
    }
}

/// Business logic for one route.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn call(&self, ctx: &RequestContext, msg: &Message) -> Result<Value, ServiceError>;
}

/// Adapter returned by [`handler_fn`].
pub struct HandlerFn<F>(F);

/// Use an async closure as a [`Handler`].
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(RequestContext, Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ServiceError>> + Send + 'static,
{
    HandlerFn(f)
}

#[async_trait]
impl<F, Fut> Handler for HandlerFn<F>
where
    F: Fn(RequestContext, Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ServiceError>> + Send + 'static,
{
    async fn call(&self, ctx: &RequestContext, msg: &Message) -> Result<Value, ServiceError> {
        (self.0)(ctx.clone(), msg.clone()).await
    }
}

type HandlerTable = HashMap<Route, Arc<dyn Handler>>;

/// The remainder of the middleware chain.
pub struct Next<'a> {
    middleware: &'a [Arc<dyn Middleware>],
    handlers: &'a HandlerTable,
}

impl<'a> Next<'a> {
    /// Run the rest of the chain and the handler.
    pub async fn run(self, ctx: &RequestContext, msg: &Message) -> Response {
        match self.middleware.split_first() {
            Some((current, rest)) => {
                let next = Next {
                    middleware: rest,
                    handlers: self.handlers,
                };
                current.process(ctx, msg, next).await
            }
            None => invoke(self.handlers, ctx, msg).await,
        }
    }
}

async fn invoke(handlers: &HandlerTable, ctx: &RequestContext, msg: &Message) -> Response {
    let route = Route::new(msg.category.as_str(), msg.action.as_str());
    let Some(handler) = handlers.get(&route) else {
        warn!(connection = %ctx.connection_id(), route = %route, "Unknown route");
        return Response::error(
            msg.correlation_id.as_str(),
            ResponseCode::BadRequest,
            format!("unknown route {route}"),
        );
    };

    match handler.call(ctx, msg).await {
        Ok(payload) => Response::ok(msg.correlation_id.as_str(), payload),
        Err(e) => {
            if let ServiceError::Internal(detail) = &e {
                error!(route = %route, connection = %ctx.connection_id(), error = %detail, "Handler failed");
            }
            Response::error(msg.correlation_id.as_str(), e.code(), e.client_message())
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

/// Routes messages to handlers through the middleware chain.
#[derive(Clone)]
pub struct MessageRouter {
    middleware: Arc<[Arc<dyn Middleware>]>,
    handlers: Arc<HandlerTable>,
}

impl MessageRouter {
    #[must_use]
    pub fn builder() -> RouterBuilder {
        RouterBuilder::new()
    }

    /// Produce the response for `msg`.
    ///
    /// Never fails: handler errors and panics are turned into error
    /// responses. The response carries the request's correlation id and a
    /// fresh server timestamp.
    pub async fn dispatch(&self, ctx: &RequestContext, msg: &Message) -> Response {
        let next = Next {
            middleware: &self.middleware,
            handlers: &self.handlers,
        };

        let response = match AssertUnwindSafe(next.run(ctx, msg)).catch_unwind().await {
            Ok(response) => response,
            Err(panic) => {
                error!(
                    route = %msg.route_name(),
                    connection = %ctx.connection_id(),
                    panic = panic_message(panic.as_ref()),
                    "Handler panicked"
                );
                Response::error(
                    msg.correlation_id.as_str(),
                    ResponseCode::Internal,
                    "internal server error",
                )
            }
        };
        response.stamped()
    }

    /// Registered routes, sorted.
    #[must_use]
    pub fn routes(&self) -> Vec<Route> {
        let mut routes: Vec<Route> = self.handlers.keys().cloned().collect();
        routes.sort();
        routes
    }

    #[must_use]
    pub fn has_route(&self, category: &str, action: &str) -> bool {
        self.handlers.contains_key(&Route::new(category, action))
    }
}

impl fmt::Debug for MessageRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageRouter")
            .field("routes", &self.handlers.len())
            .field("middleware", &self.middleware.len())
            .finish()
    }
}

/// Collects routes and middleware before startup.
#[derive(Default)]
pub struct RouterBuilder {
    handlers: HandlerTable,
    layers: Vec<Arc<dyn Middleware>>,
    standard: Vec<Arc<dyn Middleware>>,
}

impl RouterBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `category:action`. A later registration of the
    /// same route replaces the earlier one.
    #[must_use]
    pub fn route(
        mut self,
        category: impl Into<String>,
        action: impl Into<String>,
        handler: impl Handler,
    ) -> Self {
        let route = Route::new(category, action);
        if self.handlers.insert(route.clone(), Arc::new(handler)).is_some() {
            warn!(route = %route, "Handler replaced");
        }
        self
    }

    /// Add middleware outside the standard chain. The first layer added is
    /// the outermost.
    #[must_use]
    pub fn layer(mut self, middleware: impl Middleware) -> Self {
        self.layers.push(Arc::new(middleware));
        self
    }

    /// Install validation, authentication, request logging and rate
    /// limiting, in that order.
    #[must_use]
    pub fn with_standard_middleware(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.standard = vec![
            Arc::new(Validation),
            Arc::new(Authentication::new(AuthPolicy::default())),
            Arc::new(RequestLogging),
            Arc::new(RateLimit::new(limiter)),
        ];
        self
    }

    #[must_use]
    pub fn build(self) -> MessageRouter {
        let middleware: Vec<Arc<dyn Middleware>> =
            self.layers.into_iter().chain(self.standard).collect();
        info!(
            routes = self.handlers.len(),
            middleware = middleware.len(),
            "Message router built"
        );
        MessageRouter {
            middleware: middleware.into(),
            handlers: Arc::new(self.handlers),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::HubConfig;
    use crate::service::NoopOnlineStatus;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn context(router: MessageRouter) -> RequestContext {
        let limiter = Arc::new(RateLimiter::new());
        let hub = Hub::new(
            HubConfig::default(),
            router,
            limiter,
            Arc::new(NoopOnlineStatus),
        );
        let (conn, _rx) = Connection::new(ConnectionId::generate(), 8);
        hub.register(conn.clone());
        RequestContext::new(hub, conn)
    }

    async fn dispatch(ctx: &RequestContext, msg: Message) -> Response {
        ctx.hub().router().dispatch(ctx, &msg).await
    }

    #[tokio::test]
    async fn test_dispatch_to_handler() {
        let router = MessageRouter::builder()
            .route(
                "echo",
                "back",
                handler_fn(|_ctx, msg: Message| async move { Ok(msg.payload) }),
            )
            .build();
        let ctx = context(router);

        let msg = Message::new("echo", "back", "r1").with_payload(json!({"n": 1}));
        let response = dispatch(&ctx, msg).await;

        assert!(response.is_success());
        assert_eq!(response.correlation_id(), "r1");
        assert_eq!(response.payload(), Some(&json!({"n": 1})));
        assert!(response.server_timestamp() > 0);
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let ctx = context(MessageRouter::builder().build());
        let response = dispatch(&ctx, Message::new("nope", "nothing", "r2")).await;

        assert_eq!(response.code(), ResponseCode::BadRequest);
        assert_eq!(response.message(), "unknown route nope:nothing");
        assert_eq!(response.correlation_id(), "r2");
    }

    #[tokio::test]
    async fn test_service_error_mapping() {
        let router = MessageRouter::builder()
            .route(
                "player",
                "getInfo",
                handler_fn(|_ctx, _msg| async { Err(ServiceError::NotFound("player".into())) }),
            )
            .route(
                "player",
                "update",
                handler_fn(|_ctx, _msg| async {
                    Err(ServiceError::Internal("db timeout".into()))
                }),
            )
            .build();
        let ctx = context(router);

        let not_found = dispatch(&ctx, Message::new("player", "getInfo", "a")).await;
        assert_eq!(not_found.code(), ResponseCode::NotFound);

        let internal = dispatch(&ctx, Message::new("player", "update", "b")).await;
        assert_eq!(internal.code(), ResponseCode::Internal);
        assert_eq!(internal.message(), "internal server error");
    }

    #[tokio::test]
    async fn test_panic_becomes_internal() {
        let router = MessageRouter::builder()
            .route(
                "boom",
                "now",
                handler_fn(|_ctx, _msg| async { panic!("handler exploded") }),
            )
            .build();
        let ctx = context(router);

        let response = dispatch(&ctx, Message::new("boom", "now", "p1")).await;
        assert_eq!(response.code(), ResponseCode::Internal);
        assert_eq!(response.correlation_id(), "p1");
    }

    #[tokio::test]
    async fn test_protected_route_not_invoked_unauthenticated() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let limiter = Arc::new(RateLimiter::new());

        let router = MessageRouter::builder()
            .with_standard_middleware(limiter)
            .route(
                "player",
                "getInfo",
                handler_fn(move |_ctx, _msg| {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(Value::Null)
                    }
                }),
            )
            .build();
        let ctx = context(router);

        let response = dispatch(&ctx, Message::new("player", "getInfo", "x1")).await;
        assert_eq!(response.code(), ResponseCode::Unauthorized);
        assert_eq!(response.correlation_id(), "x1");
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        ctx.authenticate(UserId(1)).await.unwrap();
        let response = dispatch(&ctx, Message::new("player", "getInfo", "x2")).await;
        assert!(response.is_success());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_layer_runs_outermost() {
        struct Deny;

        #[async_trait]
        impl Middleware for Deny {
            async fn process(
                &self,
                _ctx: &RequestContext,
                msg: &Message,
                _next: Next<'_>,
            ) -> Response {
                Response::error(msg.correlation_id.as_str(), ResponseCode::Forbidden, "denied")
            }
        }

        let router = MessageRouter::builder()
            .layer(Deny)
            .with_standard_middleware(Arc::new(RateLimiter::new()))
            .build();
        let ctx = context(router);

        // Rejected by the layer before validation sees the empty action.
        let response = dispatch(&ctx, Message::new("auth", "", "l1")).await;
        assert_eq!(response.code(), ResponseCode::Forbidden);
    }

    #[test]
    fn test_routes_listing() {
        let router = MessageRouter::builder()
            .route("b", "x", handler_fn(|_c, _m| async { Ok(Value::Null) }))
            .route("a", "y", handler_fn(|_c, _m| async { Ok(Value::Null) }))
            .build();

        let names: Vec<String> = router.routes().iter().map(ToString::to_string).collect();
        assert_eq!(names, vec!["a:y", "b:x"]);
        assert!(router.has_route("a", "y"));
        assert!(!router.has_route("a", "x"));
    }
}
