//! Gamehub server library: configuration, metrics, the development service
//! layer and the axum endpoints used by the `gamehub` binary.

pub mod config;
pub mod handlers;
pub mod metrics;
pub mod services;

pub use config::Config;
pub use handlers::{app, run_server, AppState};
