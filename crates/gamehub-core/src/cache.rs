//! Expiring key-value cache in front of the persistence tier.
//!
//! Entries expire a fixed TTL after they were written. When the cache is
//! full, inserting a new key evicts the least-recently-accessed entry. The
//! cache has no write-through: callers must [`TtlCache::delete`] a key after
//! every successful write to the underlying record.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Longest lifetime an entry can be given; larger TTLs are clamped.
pub const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of entries.
    pub capacity: usize,
    /// TTL used by [`TtlCache::insert`].
    pub default_ttl: Duration,
    /// How often the background sweep runs.
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            default_ttl: Duration::from_secs(5 * 60),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
struct CacheEntry<V> {
    value: V,
    created_at: Instant,
    last_access: Instant,
    expires_at: Instant,
    /// Position in the access order.
    tick: u64,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug)]
struct Inner<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    /// Access tick -> key, oldest first.
    order: BTreeMap<u64, K>,
    next_tick: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
}

impl<K: Eq + Hash + Clone, V> Inner<K, V> {
    fn bump_tick(&mut self) -> u64 {
        let tick = self.next_tick;
        self.next_tick += 1;
        tick
    }

    fn remove(&mut self, key: &K) -> Option<CacheEntry<V>> {
        let entry = self.entries.remove(key)?;
        self.order.remove(&entry.tick);
        Some(entry)
    }

    fn evict_least_recent(&mut self) {
        if let Some((_, key)) = self.order.pop_first() {
            self.entries.remove(&key);
            self.evictions += 1;
        }
    }
}

/// A capacity-bounded cache with per-entry TTL.
///
/// All operations take one mutex. Accesses and evictions are `O(log n)`.
#[derive(Debug)]
pub struct TtlCache<K, V> {
    inner: Mutex<Inner<K, V>>,
    config: CacheConfig,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(CacheConfig::default())
    }

    #[must_use]
    pub fn with_config(config: CacheConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                order: BTreeMap::new(),
                next_tick: 0,
                hits: 0,
                misses: 0,
                evictions: 0,
                expirations: 0,
            }),
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, Inner<K, V>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up a live entry, refreshing its access time.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let mut guard = self.lock();
        let inner = &mut *guard;

        let expired = match inner.entries.get(key) {
            Some(entry) => entry.is_expired(now),
            None => {
                inner.misses += 1;
                return None;
            }
        };

        if expired {
            inner.remove(key);
            inner.expirations += 1;
            inner.misses += 1;
            return None;
        }

        let tick = inner.bump_tick();
        let entry = inner.entries.get_mut(key)?;
        inner.order.remove(&entry.tick);
        inner.order.insert(tick, key.clone());
        entry.tick = tick;
        entry.last_access = now;
        inner.hits += 1;
        Some(entry.value.clone())
    }

    /// Store `value` under `key` for `ttl`.
    ///
    /// Overwriting an existing key never evicts. Inserting a new key into a
    /// full cache evicts the least-recently-accessed entry first. `ttl` is
    /// clamped to [`MAX_TTL`].
    pub fn set(&self, key: K, value: V, ttl: Duration) {
        let now = Instant::now();
        let mut guard = self.lock();
        let inner = &mut *guard;

        if inner.remove(&key).is_none() && inner.entries.len() >= self.config.capacity.max(1) {
            inner.evict_least_recent();
        }

        let tick = inner.bump_tick();
        inner.order.insert(tick, key.clone());
        inner.entries.insert(
            key,
            CacheEntry {
                value,
                created_at: now,
                last_access: now,
                expires_at: now + ttl.min(MAX_TTL),
                tick,
            },
        );
    }

    /// Store with the default TTL.
    pub fn insert(&self, key: K, value: V) {
        self.set(key, value, self.config.default_ttl);
    }

    /// Invalidate one key. Returns whether it was present.
    pub fn delete(&self, key: &K) -> bool {
        self.lock().remove(key).is_some()
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.order.clear();
    }

    /// Read through the cache, loading and storing the value on a miss.
    ///
    /// Loader errors are returned unchanged and nothing is cached.
    ///
    /// # Errors
    ///
    /// Returns the loader's error.
    pub async fn get_or_try_load<F, Fut, E>(&self, key: K, load: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }
        let value = load().await?;
        self.insert(key, value.clone());
        Ok(value)
    }

    /// Number of unexpired entries.
    #[must_use]
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.lock()
            .entries
            .values()
            .filter(|entry| !entry.is_expired(now))
            .count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Age of an entry since it was written, if present and unexpired.
    #[must_use]
    pub fn age(&self, key: &K) -> Option<Duration> {
        let now = Instant::now();
        self.lock()
            .entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| now.duration_since(entry.created_at))
    }

    /// Remove every expired entry. Returns the number removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut guard = self.lock();
        let inner = &mut *guard;

        let expired: Vec<K> = inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            inner.remove(key);
        }
        inner.expirations += expired.len() as u64;

        if !expired.is_empty() {
            info!(
                expired_entries = expired.len(),
                active_entries = inner.entries.len(),
                "Cache cleanup completed"
            );
        }
        expired.len()
    }

    /// Start the periodic expiry sweep.
    ///
    /// The task ends on its own once the cache is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let cache = Arc::downgrade(self);
        let period = self.config.sweep_interval;
        if period.is_zero() {
            warn!("Cache sweep interval is zero, sweeper disabled");
            return tokio::spawn(async {});
        }

        tokio::spawn(async move {
            let mut ticker = time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(cache) = cache.upgrade() else {
                    debug!("Cache dropped, stopping sweeper");
                    break;
                };
                cache.sweep();
            }
        })
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats {
            entries: inner.entries.len(),
            capacity: self.config.capacity,
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            expirations: inner.expirations,
        }
    }
}

impl<K, V> Default for TtlCache<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
}
