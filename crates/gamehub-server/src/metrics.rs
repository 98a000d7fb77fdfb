//! Metrics collection and export for Gamehub.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use async_trait::async_trait;
use gamehub_core::{CloseReason, Middleware, Next, RequestContext};
use gamehub_protocol::{Message, Response, ResponseCode};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Instant;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "gamehub_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "gamehub_connections_active";
    pub const CONNECTIONS_REJECTED: &str = "gamehub_connections_rejected_total";
    pub const SESSIONS_CLOSED: &str = "gamehub_sessions_closed_total";
    pub const REQUESTS_TOTAL: &str = "gamehub_requests_total";
    pub const REQUEST_DURATION_SECONDS: &str = "gamehub_request_duration_seconds";
    pub const RATE_LIMITED_TOTAL: &str = "gamehub_rate_limited_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(
        names::CONNECTIONS_REJECTED,
        "WebSocket upgrades refused, by reason"
    );
    metrics::describe_counter!(names::SESSIONS_CLOSED, "Sessions ended, by reason");
    metrics::describe_counter!(
        names::REQUESTS_TOTAL,
        "Requests dispatched, by route and response code"
    );
    metrics::describe_histogram!(
        names::REQUEST_DURATION_SECONDS,
        "Request dispatch latency in seconds"
    );
    metrics::describe_counter!(
        names::RATE_LIMITED_TOTAL,
        "Requests rejected by the rate limiter"
    );

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a refused upgrade.
pub fn record_rejected(reason: &'static str) {
    counter!(names::CONNECTIONS_REJECTED, "reason" => reason).increment(1);
}

fn close_label(reason: &CloseReason) -> &'static str {
    match reason {
        CloseReason::ClientClosed => "client_closed",
        CloseReason::IdleTimeout => "idle_timeout",
        CloseReason::Transport(_) => "transport_error",
        CloseReason::QueueFull => "queue_full",
        CloseReason::Logout => "logout",
        CloseReason::Closed => "closed",
    }
}

/// Record why a session ended.
pub fn record_session_closed(reason: &CloseReason) {
    counter!(names::SESSIONS_CLOSED, "reason" => close_label(reason)).increment(1);
}

/// Record one dispatched request.
pub fn record_request(msg: &Message, code: ResponseCode, seconds: f64) {
    counter!(
        names::REQUESTS_TOTAL,
        "category" => msg.category.clone(),
        "action" => msg.action.clone(),
        "code" => code.as_str()
    )
    .increment(1);
    histogram!(names::REQUEST_DURATION_SECONDS, "category" => msg.category.clone())
        .record(seconds);

    if code == ResponseCode::RateLimited {
        counter!(names::RATE_LIMITED_TOTAL).increment(1);
    }
}

/// Outermost router layer recording request metrics. It never answers a
/// request itself.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsMiddleware;

#[async_trait]
impl Middleware for MetricsMiddleware {
    async fn process(&self, ctx: &RequestContext, msg: &Message, next: Next<'_>) -> Response {
        let start = Instant::now();
        let response = next.run(ctx, msg).await;
        record_request(msg, response.code(), start.elapsed().as_secs_f64());
        response
    }
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}
