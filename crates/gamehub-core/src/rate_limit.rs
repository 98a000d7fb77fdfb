//! Per-connection sliding-window rate limiting.
//!
//! Each client keeps the timestamps of its admitted requests inside the
//! trailing window. A request is admitted while fewer than `max_requests`
//! timestamps remain after pruning. Entries are created on first use and
//! removed either by [`RateLimiter::remove_client`] on disconnect or by the
//! idle sweep.

use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Rate limiter configuration.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Requests admitted per window.
    pub max_requests: usize,
    /// Length of the sliding window.
    pub window: Duration,
    /// Entries idle for longer than this are dropped by the sweep.
    pub idle_timeout: Duration,
    /// How often the background sweep runs.
    pub sweep_interval: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 60,
            window: Duration::from_secs(60),
            idle_timeout: Duration::from_secs(5 * 60),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
struct ClientWindow {
    requests: VecDeque<Instant>,
    last_activity: Instant,
}

impl ClientWindow {
    fn new(now: Instant) -> Self {
        Self {
            requests: VecDeque::new(),
            last_activity: now,
        }
    }

    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&oldest) = self.requests.front() {
            if now.duration_since(oldest) < window {
                break;
            }
            self.requests.pop_front();
        }
    }
}

/// Sliding-window limiter keyed by client id.
///
/// A single mutex guards all entries; the work done under it is bounded by
/// `max_requests` per call.
#[derive(Debug)]
pub struct RateLimiter {
    clients: Mutex<HashMap<String, ClientWindow>>,
    config: RateLimitConfig,
}

impl RateLimiter {
    /// Create a rate limiter with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RateLimitConfig::default())
    }

    #[must_use]
    pub fn with_config(config: RateLimitConfig) -> Self {
        info!("Creating rate limiter with config: {:?}", config);
        Self {
            clients: Mutex::new(HashMap::new()),
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ClientWindow>> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Check whether `client` may make another request now, recording it if
    /// so.
    pub fn is_allowed(&self, client: &str) -> bool {
        let now = Instant::now();
        let mut clients = self.lock();

        let entry = clients
            .entry(client.to_string())
            .or_insert_with(|| ClientWindow::new(now));

        entry.last_activity = now;
        entry.prune(now, self.config.window);

        if entry.requests.len() >= self.config.max_requests {
            debug!(client = %client, limit = self.config.max_requests, "Rate limit exceeded");
            return false;
        }

        entry.requests.push_back(now);
        true
    }

    /// Drop all state for `client`.
    pub fn remove_client(&self, client: &str) {
        if self.lock().remove(client).is_some() {
            debug!(client = %client, "Rate limiter entry removed");
        }
    }

    /// Remove entries idle for longer than the configured timeout.
    ///
    /// Returns the number of removed entries.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let idle_timeout = self.config.idle_timeout;

        let mut clients = self.lock();
        let before = clients.len();
        clients.retain(|_, entry| now.duration_since(entry.last_activity) <= idle_timeout);
        let removed = before - clients.len();

        if removed > 0 {
            info!(
                removed_clients = removed,
                active_clients = clients.len(),
                "Rate limiter cleanup completed"
            );
        }
        removed
    }

    /// Start the periodic idle sweep.
    ///
    /// The task ends on its own once the limiter is dropped; abort the
    /// handle to stop it earlier.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let limiter = Arc::downgrade(self);
        let period = self.config.sweep_interval;
        if period.is_zero() {
            warn!("Rate limiter sweep interval is zero, sweeper disabled");
            return tokio::spawn(async {});
        }

        tokio::spawn(async move {
            let mut ticker = time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                match limiter.upgrade() {
                    Some(limiter) => {
                        limiter.sweep();
                    }
                    None => break,
                }
            }
        })
    }

    /// Number of clients currently tracked.
    #[must_use]
    pub fn tracked_clients(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn stats(&self) -> RateLimitStats {
        let clients = self.lock();
        RateLimitStats {
            tracked_clients: clients.len(),
            recorded_requests: clients.values().map(|c| c.requests.len()).sum(),
            max_requests: self.config.max_requests,
            window_secs: self.config.window.as_secs(),
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

/// Rate limiter statistics.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitStats {
    pub tracked_clients: usize,
    /// Timestamps currently held across all clients.
    pub recorded_requests: usize,
    pub max_requests: usize,
    pub window_secs: u64,
}
