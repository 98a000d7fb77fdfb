//! HTTP and WebSocket handlers for the Gamehub server.
//!
//! This module wires the core together and serves it over axum.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard, MetricsMiddleware};
use crate::services::{self, MemoryDirectory, PlayerService};
use anyhow::{Context, Result};
use axum::{
    extract::{ws::WebSocket, State, WebSocketUpgrade},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use gamehub_core::{handlers as builtin, session, Hub, MessageRouter, OnlineStatus, RateLimiter, TtlCache};
use gamehub_protocol::codec::MAX_FRAME_SIZE;
use gamehub_transport::split_websocket;
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    pub hub: Hub,
    pub config: Config,
    pub directory: Arc<MemoryDirectory>,
    pub players: Arc<PlayerService>,
}

impl AppState {
    /// Build the hub, router and services from `config`.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let limiter = Arc::new(RateLimiter::with_config(config.rate_limit_config()));
        let directory = Arc::new(MemoryDirectory::new());
        let cache = Arc::new(TtlCache::with_config(config.cache_config()));
        let players = Arc::new(PlayerService::new(directory.clone(), cache));

        let router = MessageRouter::builder()
            .layer(MetricsMiddleware)
            .with_standard_middleware(limiter.clone());
        let router = builtin::install(router, directory.clone());
        let router = services::install(router, players.clone()).build();

        let hub = Hub::new(config.hub_config(), router, limiter, directory.clone());

        Self {
            hub,
            config,
            directory,
            players,
        }
    }

    /// Start the limiter and cache sweepers.
    pub fn spawn_background_tasks(&self) -> Vec<JoinHandle<()>> {
        vec![
            self.hub.limiter().spawn_sweeper(),
            self.players.cache().spawn_sweeper(),
        ]
    }
}

/// Build the axum application.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .route("/routes", get(routes_handler))
        .route("/stats", get(stats_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));

    if let Err(e) = state.directory.reset_all().await {
        warn!(error = %e, "Failed to reset online status");
    }

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let tasks = state.spawn_background_tasks();

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("Gamehub server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    for task in tasks {
        task.abort();
    }
    info!("Gamehub server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "connections": state.hub.len(),
    }))
}

async fn routes_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let routes: Vec<String> = state
        .hub
        .router()
        .routes()
        .iter()
        .map(ToString::to_string)
        .collect();
    Json(json!({ "routes": routes }))
}

async fn stats_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "hub": state.hub.stats(),
        "rateLimiter": state.hub.limiter().stats(),
        "cache": state.players.cache_stats(),
        "onlineUsers": state.directory.online_count(),
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Response {
    let origin = headers
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok());
    if !state.config.origin_allowed(origin) {
        warn!(origin = ?origin, "WebSocket origin rejected");
        metrics::record_rejected("origin");
        return (StatusCode::FORBIDDEN, "origin not allowed").into_response();
    }

    if state.hub.len() >= state.config.limits.max_connections {
        warn!(
            limit = state.config.limits.max_connections,
            "Connection limit reached"
        );
        metrics::record_rejected("capacity");
        return (StatusCode::SERVICE_UNAVAILABLE, "server at capacity").into_response();
    }

    ws.max_message_size(MAX_FRAME_SIZE)
        .on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>) {
    let _metrics_guard = ConnectionMetricsGuard::new();
    debug!("WebSocket connected");

    let (source, sink) = split_websocket(socket, MAX_FRAME_SIZE);
    let reason = session::serve(state.hub.clone(), source, sink).await;

    metrics::record_session_closed(&reason);
    debug!(reason = %reason, "WebSocket disconnected");
}
