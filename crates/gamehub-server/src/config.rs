//! Server configuration.
//!
//! Configuration is layered, later sources overriding earlier ones:
//! - Built-in defaults
//! - TOML configuration file (`--config <path>` or the first default path
//!   that exists)
//! - Environment variables (`GAMEHUB_PORT`, `GAMEHUB_LIMITS__MAX_CONNECTIONS`, ...)

use anyhow::{ensure, Context, Result};
use gamehub_core::cache::MAX_TTL;
use gamehub_core::{CacheConfig, HubConfig, RateLimitConfig};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_PATHS: [&str; 3] = [
    "gamehub.toml",
    "/etc/gamehub/gamehub.toml",
    "~/.config/gamehub/gamehub.toml",
];

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub transport: TransportConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    #[serde(default)]
    pub rate_limit: RateLimitSection,

    #[serde(default)]
    pub cache: CacheSection,

    #[serde(default)]
    pub metrics: MetricsConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path for WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,

    /// Accepted `Origin` headers. Empty accepts any origin.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum number of connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Frames buffered per connection before it is dropped.
    #[serde(default = "default_queue_capacity")]
    pub outbound_queue_capacity: usize,

    /// Maximum message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Keep-alive ping interval in milliseconds.
    #[serde(default = "default_heartbeat_interval")]
    pub interval_ms: u64,

    /// Idle timeout in milliseconds.
    #[serde(default = "default_heartbeat_timeout")]
    pub timeout_ms: u64,

    /// Per-write deadline in milliseconds.
    #[serde(default = "default_write_timeout")]
    pub write_timeout_ms: u64,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSection {
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: usize,

    #[serde(default = "default_limiter_idle")]
    pub idle_timeout_secs: u64,

    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

/// Player cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSection {
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,

    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,

    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    #[default]
    Compact,
    Json,
}

/// Logging configuration. `RUST_LOG` takes precedence over `level`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

// Default value functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_max_connections() -> usize {
    10_000
}

fn default_queue_capacity() -> usize {
    256
}

fn default_max_message_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_heartbeat_interval() -> u64 {
    54_000 // 54 seconds
}

fn default_heartbeat_timeout() -> u64 {
    60_000 // 60 seconds
}

fn default_write_timeout() -> u64 {
    10_000
}

fn default_requests_per_minute() -> usize {
    60
}

fn default_limiter_idle() -> u64 {
    300
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_cache_capacity() -> usize {
    1000
}

fn default_cache_ttl() -> u64 {
    300
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_log_level() -> String {
    "gamehub=info,gamehub_core=info,gamehub_server=info,gamehub_transport=info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            limits: LimitsConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            rate_limit: RateLimitSection::default(),
            cache: CacheSection::default(),
            metrics: MetricsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
            allowed_origins: Vec::new(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            outbound_queue_capacity: default_queue_capacity(),
            max_message_size: default_max_message_size(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_heartbeat_interval(),
            timeout_ms: default_heartbeat_timeout(),
            write_timeout_ms: default_write_timeout(),
        }
    }
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            requests_per_minute: default_requests_per_minute(),
            idle_timeout_secs: default_limiter_idle(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
            ttl_secs: default_cache_ttl(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

impl Config {
    /// Load configuration from `path`, or the first default path that
    /// exists, with environment overrides applied on top.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be read or
    /// parsed, or if the result fails [`Config::validate`].
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => Some(path.to_path_buf()),
            None => Self::find_default_file(),
        };
        let contents = match &file {
            Some(path) => Some(
                std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file: {}", path.display()))?,
            ),
            None => None,
        };

        let config = Self::layered(contents.as_deref(), config::Environment::default())
            .with_context(|| match &file {
                Some(path) => format!("Failed to parse config file: {}", path.display()),
                None => "Failed to parse configuration".to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    fn find_default_file() -> Option<PathBuf> {
        DEFAULT_PATHS
            .iter()
            .map(|path| PathBuf::from(shellexpand::tilde(path).as_ref()))
            .find(|path| path.exists())
    }

    /// Merge TOML `contents` with `GAMEHUB_*` variables from `env`.
    fn layered(contents: Option<&str>, env: config::Environment) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(contents) = contents {
            builder = builder.add_source(config::File::from_str(
                contents,
                config::FileFormat::Toml,
            ));
        }
        let settings = builder
            .add_source(
                env.prefix("GAMEHUB")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("transport.allowed_origins"),
            )
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    /// Check cross-field invariants.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first violated constraint.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("heartbeat.interval_ms", self.heartbeat.interval_ms),
            ("heartbeat.timeout_ms", self.heartbeat.timeout_ms),
            ("heartbeat.write_timeout_ms", self.heartbeat.write_timeout_ms),
            ("rate_limit.idle_timeout_secs", self.rate_limit.idle_timeout_secs),
            ("rate_limit.sweep_interval_secs", self.rate_limit.sweep_interval_secs),
            ("cache.ttl_secs", self.cache.ttl_secs),
            ("cache.sweep_interval_secs", self.cache.sweep_interval_secs),
        ] {
            ensure!(value > 0, "{name} must be positive");
        }
        ensure!(
            self.cache.ttl_secs <= MAX_TTL.as_secs(),
            "cache.ttl_secs ({}) must not exceed {}",
            self.cache.ttl_secs,
            MAX_TTL.as_secs()
        );
        ensure!(self.cache.capacity > 0, "cache.capacity must be positive");
        ensure!(
            self.heartbeat.interval_ms < self.heartbeat.timeout_ms,
            "heartbeat.interval_ms ({}) must be shorter than heartbeat.timeout_ms ({})",
            self.heartbeat.interval_ms,
            self.heartbeat.timeout_ms
        );
        ensure!(
            self.limits.outbound_queue_capacity > 0,
            "limits.outbound_queue_capacity must be positive"
        );
        ensure!(
            self.rate_limit.requests_per_minute > 0,
            "rate_limit.requests_per_minute must be positive"
        );
        ensure!(
            self.transport.websocket_path.starts_with('/'),
            "transport.websocket_path must start with '/'"
        );
        Ok(())
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if `host:port` is not a valid socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid host:port {}:{}", self.host, self.port))
    }

    /// Effective configuration as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }

    #[must_use]
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            outbound_queue_capacity: self.limits.outbound_queue_capacity,
            keepalive_interval: Duration::from_millis(self.heartbeat.interval_ms),
            idle_timeout: Duration::from_millis(self.heartbeat.timeout_ms),
            write_timeout: Duration::from_millis(self.heartbeat.write_timeout_ms),
            max_message_size: self.limits.max_message_size,
        }
    }

    #[must_use]
    pub fn rate_limit_config(&self) -> RateLimitConfig {
        RateLimitConfig {
            max_requests: self.rate_limit.requests_per_minute,
            window: Duration::from_secs(60),
            idle_timeout: Duration::from_secs(self.rate_limit.idle_timeout_secs),
            sweep_interval: Duration::from_secs(self.rate_limit.sweep_interval_secs),
        }
    }

    #[must_use]
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            capacity: self.cache.capacity,
            default_ttl: Duration::from_secs(self.cache.ttl_secs),
            sweep_interval: Duration::from_secs(self.cache.sweep_interval_secs),
        }
    }

    /// Whether a WebSocket upgrade with this `Origin` header is accepted.
    #[must_use]
    pub fn origin_allowed(&self, origin: Option<&str>) -> bool {
        match origin {
            None => true,
            Some(_) if self.transport.allowed_origins.is_empty() => true,
            Some(origin) => self
                .transport
                .allowed_origins
                .iter()
                .any(|allowed| allowed == "*" || allowed.eq_ignore_ascii_case(origin)),
        }
    }
}
