//! # gamehub-core
//!
//! Connection management and request routing for the Gamehub game server.
//!
//! This crate provides the building blocks between the socket and the
//! business services:
//!
//! - **Hub** - Registry of live connections and logged-in users
//! - **Session** - Per-connection read/write loops with heartbeats
//! - **Router** - `(category, action)` dispatch through a middleware chain
//! - **RateLimiter** - Per-connection sliding-window request ceiling
//! - **TtlCache** - Expiring capacity-bounded cache for service reads
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   Session   │────▶│   Router    │────▶│   Handler   │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        │                   │                   │
//!        ▼                   ▼                   ▼
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │     Hub     │     │ RateLimiter │     │  TtlCache   │
//! └─────────────┘     └─────────────┘     └─────────────┘
//! ```

pub mod cache;
pub mod connection;
pub mod handlers;
pub mod hub;
pub mod middleware;
pub mod rate_limit;
pub mod router;
pub mod service;
pub mod session;

pub use cache::{CacheConfig, CacheStats, TtlCache};
pub use connection::{Connection, ConnectionState, EnqueueError};
pub use hub::{Hub, HubConfig, HubStats};
pub use middleware::{AuthPolicy, Middleware};
pub use rate_limit::{RateLimitConfig, RateLimitStats, RateLimiter};
pub use router::{handler_fn, Handler, MessageRouter, Next, RequestContext, Route, RouterBuilder};
pub use service::{
    Authenticator, LoginOutcome, NoopOnlineStatus, OnlineStatus, ServiceError, UserId,
};
pub use session::{serve, CloseReason};
