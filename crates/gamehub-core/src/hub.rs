//! Connection registry.
//!
//! The [`Hub`] owns the set of live connections and the index from user id
//! to the connection that user is logged in on. Both maps sit behind one
//! `RwLock` so they always change together:
//!
//! - every user index entry points at a live connection
//! - a user is bound to at most one connection
//!
//! The lock is never held across an `.await`. Online/offline bookkeeping
//! and notices to evicted sessions run after it is released. Status updates
//! are serialized and always write the binding as it stands when they run,
//! so a late update cannot overwrite a newer one.

use gamehub_protocol::{Response, ResponseCode};
use gamehub_transport::{ConnectionId, WireFrame};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::connection::{Connection, ConnectionState, EnqueueError};
use crate::rate_limit::RateLimiter;
use crate::router::MessageRouter;
use crate::service::{OnlineStatus, ServiceError, UserId};

/// Notice sent to a session displaced by a newer login of the same user.
pub const SESSION_REPLACED: &str = "session replaced by a newer login";

/// Per-connection limits and timers.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Frames buffered per connection before it is considered dead.
    pub outbound_queue_capacity: usize,
    /// Interval between keep-alive pings. Must be shorter than
    /// `idle_timeout`.
    pub keepalive_interval: Duration,
    /// A connection with no inbound frame for this long is closed.
    pub idle_timeout: Duration,
    /// Upper bound on a single outbound write.
    pub write_timeout: Duration,
    /// Largest accepted inbound message in bytes.
    pub max_message_size: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            outbound_queue_capacity: 256,
            keepalive_interval: Duration::from_secs(54),
            idle_timeout: Duration::from_secs(60),
            write_timeout: Duration::from_secs(10),
            max_message_size: 64 * 1024,
        }
    }
}

#[derive(Debug, Default)]
struct Registry {
    live: HashMap<ConnectionId, Arc<Connection>>,
    users: HashMap<UserId, ConnectionId>,
}

impl Registry {
    /// Drop the index entry for `user` if it points at `conn`.
    fn unbind(&mut self, user: UserId, conn: &ConnectionId) -> bool {
        if self.users.get(&user) == Some(conn) {
            self.users.remove(&user);
            true
        } else {
            false
        }
    }
}

struct HubInner {
    config: HubConfig,
    registry: RwLock<Registry>,
    router: MessageRouter,
    limiter: Arc<RateLimiter>,
    online: Arc<dyn OnlineStatus>,
    status_order: tokio::sync::Mutex<()>,
    total_connections: AtomicU64,
    evicted_connections: AtomicU64,
}

/// Shared handle to the connection registry.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

impl Hub {
    pub fn new(
        config: HubConfig,
        router: MessageRouter,
        limiter: Arc<RateLimiter>,
        online: Arc<dyn OnlineStatus>,
    ) -> Self {
        info!("Creating hub with config: {:?}", config);
        Self {
            inner: Arc::new(HubInner {
                config,
                registry: RwLock::new(Registry::default()),
                router,
                limiter,
                online,
                status_order: tokio::sync::Mutex::new(()),
                total_connections: AtomicU64::new(0),
                evicted_connections: AtomicU64::new(0),
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &HubConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn router(&self) -> &MessageRouter {
        &self.inner.router
    }

    #[must_use]
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.inner.limiter
    }

    fn read(&self) -> RwLockReadGuard<'_, Registry> {
        self.inner
            .registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Registry> {
        self.inner
            .registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a connection to the live set and mark it open.
    pub fn register(&self, conn: Arc<Connection>) {
        conn.set_state(ConnectionState::Open);
        let id = conn.id().clone();
        let count = {
            let mut registry = self.write();
            registry.live.insert(id.clone(), conn);
            registry.live.len()
        };
        self.inner.total_connections.fetch_add(1, Ordering::Relaxed);
        debug!(connection = %id, connections = count, "Connection registered");
    }

    /// Remove a connection and release everything it holds.
    ///
    /// Safe to call any number of times; only the first call has effects.
    pub async fn unregister(&self, conn: &Connection) {
        let (removed, released) = {
            let mut registry = self.write();
            let removed = registry.live.remove(conn.id()).is_some();
            let released = conn
                .replace_user(None)
                .filter(|user| registry.unbind(*user, conn.id()));
            (removed, released)
        };

        conn.close();
        self.inner.limiter.remove_client(conn.id().as_str());

        if removed {
            debug!(connection = %conn.id(), user = ?released, "Connection unregistered");
        }
        if let Some(user) = released {
            self.sync_status(user).await;
        }
    }

    /// Bind `user` to `conn`, evicting any other session of that user.
    ///
    /// # Errors
    ///
    /// Fails with [`ServiceError::Conflict`] if `conn` is no longer live.
    pub async fn associate_user(&self, user: UserId, conn: &Connection) -> Result<(), ServiceError> {
        let (evicted, switched_from) = {
            let mut registry = self.write();
            if !registry.live.contains_key(conn.id()) {
                return Err(ServiceError::Conflict("connection is closed".into()));
            }

            let switched_from = conn
                .replace_user(Some(user))
                .filter(|previous| *previous != user)
                .filter(|previous| registry.unbind(*previous, conn.id()));

            let evicted = match registry.users.insert(user, conn.id().clone()) {
                Some(old_id) if old_id != *conn.id() => registry.live.remove(&old_id),
                _ => None,
            };
            if let Some(old) = &evicted {
                old.replace_user(None);
            }
            (evicted, switched_from)
        };

        conn.set_state(ConnectionState::Authenticated);

        if let Some(old) = evicted {
            warn!(
                user = %user,
                connection = %old.id(),
                replaced_by = %conn.id(),
                "Duplicate login, closing previous session"
            );
            let notice = Response::error("", ResponseCode::Conflict, SESSION_REPLACED);
            if let Err(e) = old.enqueue_response(&notice, old.encoding()) {
                debug!(connection = %old.id(), error = %e, "Replacement notice not queued");
            }
            old.close();
            self.inner.limiter.remove_client(old.id().as_str());
            self.inner
                .evicted_connections
                .fetch_add(1, Ordering::Relaxed);
        }

        if let Some(previous) = switched_from {
            self.sync_status(previous).await;
        }

        self.sync_status(user).await;
        info!(user = %user, connection = %conn.id(), "User authenticated");
        Ok(())
    }

    /// Unbind the user of `conn` (logout). The connection stays registered.
    pub async fn release_user(&self, conn: &Connection) -> Option<UserId> {
        let released = {
            let mut registry = self.write();
            conn.replace_user(None)
                .filter(|user| registry.unbind(*user, conn.id()))
        };

        conn.set_state(ConnectionState::Open);
        if let Some(user) = released {
            info!(user = %user, connection = %conn.id(), "User logged out");
            self.sync_status(user).await;
        }
        released
    }

    /// Write the current online state of `user` to the status store.
    async fn sync_status(&self, user: UserId) {
        let _order = self.inner.status_order.lock().await;
        let online = self.read().users.contains_key(&user);
        let result = if online {
            self.inner.online.set_online(user).await
        } else {
            self.inner.online.set_offline(user).await
        };
        if let Err(e) = result {
            warn!(user = %user, online, error = %e, "Failed to update online status");
        }
    }

    /// The connection `user` is currently logged in on.
    #[must_use]
    pub fn lookup_by_user(&self, user: UserId) -> Option<Arc<Connection>> {
        let registry = self.read();
        let id = registry.users.get(&user)?;
        registry.live.get(id).cloned()
    }

    /// Live connection by id.
    #[must_use]
    pub fn get(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        self.read().live.get(id).cloned()
    }

    #[must_use]
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.read().live.contains_key(id)
    }

    /// Queue a frame for one user. A full queue disconnects that session.
    pub async fn send_to_user(&self, user: UserId, frame: WireFrame) -> bool {
        let Some(conn) = self.lookup_by_user(user) else {
            return false;
        };
        match conn.enqueue(frame) {
            Ok(()) => true,
            Err(EnqueueError::Full) => {
                self.evict_slow(&conn).await;
                false
            }
            Err(_) => false,
        }
    }

    /// Queue a frame on every live connection without waiting.
    ///
    /// Connections whose queue is full are unregistered. Returns how many
    /// connections accepted the frame.
    pub async fn broadcast(&self, frame: WireFrame) -> usize {
        let targets: Vec<Arc<Connection>> = self.read().live.values().cloned().collect();

        let mut delivered = 0;
        let mut slow = Vec::new();
        for conn in targets {
            match conn.enqueue(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(EnqueueError::Full) => slow.push(conn),
                Err(_) => {}
            }
        }

        for conn in &slow {
            self.evict_slow(conn).await;
        }
        debug!(delivered, evicted = slow.len(), "Broadcast complete");
        delivered
    }

    async fn evict_slow(&self, conn: &Connection) {
        warn!(connection = %conn.id(), "Outbound queue full, disconnecting");
        self.inner
            .evicted_connections
            .fetch_add(1, Ordering::Relaxed);
        self.unregister(conn).await;
    }

    /// Number of live connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().live.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn stats(&self) -> HubStats {
        let registry = self.read();
        HubStats {
            connections: registry.live.len(),
            authenticated_users: registry.users.len(),
            total_connections: self.inner.total_connections.load(Ordering::Relaxed),
            evicted_connections: self.inner.evicted_connections.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("config", &self.inner.config)
            .field("connections", &self.len())
            .finish_non_exhaustive()
    }
}

/// Registry statistics.
#[derive(Debug, Clone, Serialize)]
pub struct HubStats {
    pub connections: usize,
    pub authenticated_users: usize,
    /// Connections registered since startup.
    pub total_connections: u64,
    /// Connections dropped for a full queue or a duplicate login.
    pub evicted_connections: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::NoopOnlineStatus;
    use async_trait::async_trait;
    use gamehub_protocol::codec;
    use std::sync::Mutex;
    use tokio::sync::Notify;

    #[derive(Default)]
    struct RecordingStatus {
        events: Mutex<Vec<(UserId, bool)>>,
    }

    #[async_trait]
    impl OnlineStatus for RecordingStatus {
        async fn set_online(&self, user: UserId) -> Result<(), ServiceError> {
            self.events.lock().unwrap().push((user, true));
            Ok(())
        }

        async fn set_offline(&self, user: UserId) -> Result<(), ServiceError> {
            self.events.lock().unwrap().push((user, false));
            Ok(())
        }
    }

    /// Holds every `set_online` call until released.
    #[derive(Default)]
    struct GatedStatus {
        entered: Notify,
        release: Notify,
        events: Mutex<Vec<(UserId, bool)>>,
    }

    #[async_trait]
    impl OnlineStatus for GatedStatus {
        async fn set_online(&self, user: UserId) -> Result<(), ServiceError> {
            self.entered.notify_one();
            self.release.notified().await;
            self.events.lock().unwrap().push((user, true));
            Ok(())
        }

        async fn set_offline(&self, user: UserId) -> Result<(), ServiceError> {
            self.events.lock().unwrap().push((user, false));
            Ok(())
        }
    }

    fn hub_with(online: Arc<dyn OnlineStatus>) -> Hub {
        Hub::new(
            HubConfig::default(),
            MessageRouter::builder().build(),
            Arc::new(RateLimiter::new()),
            online,
        )
    }

    fn hub() -> Hub {
        hub_with(Arc::new(NoopOnlineStatus))
    }

    fn connection(id: &str, capacity: usize) -> (Arc<Connection>, tokio::sync::mpsc::Receiver<WireFrame>) {
        Connection::new(ConnectionId::new(id), capacity)
    }

    #[tokio::test]
    async fn test_register_unregister_twice() {
        let hub = hub();
        let (conn, _rx) = connection("c1", 4);

        hub.register(conn.clone());
        assert_eq!(conn.state(), ConnectionState::Open);
        hub.associate_user(UserId(7), &conn).await.unwrap();
        assert!(hub.lookup_by_user(UserId(7)).is_some());

        hub.unregister(&conn).await;
        hub.unregister(&conn).await;

        assert!(hub.is_empty());
        assert!(hub.lookup_by_user(UserId(7)).is_none());
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn test_unregister_marks_offline_once() {
        let status = Arc::new(RecordingStatus::default());
        let hub = hub_with(status.clone());
        let (conn, _rx) = connection("c1", 4);

        hub.register(conn.clone());
        hub.associate_user(UserId(1), &conn).await.unwrap();
        hub.unregister(&conn).await;
        hub.unregister(&conn).await;

        let events = status.events.lock().unwrap().clone();
        assert_eq!(events, vec![(UserId(1), true), (UserId(1), false)]);
    }

    #[tokio::test]
    async fn test_broadcast_drops_full_connection() {
        let hub = hub();
        let (healthy, mut healthy_rx) = connection("healthy", 4);
        let (slow, _slow_rx) = connection("slow", 1);

        hub.register(healthy.clone());
        hub.register(slow.clone());
        hub.associate_user(UserId(2), &slow).await.unwrap();
        slow.enqueue(WireFrame::Text("backlog".into())).unwrap();

        let delivered = hub.broadcast(WireFrame::Text("news".into())).await;

        assert_eq!(delivered, 1);
        assert!(!hub.contains(slow.id()));
        assert!(hub.lookup_by_user(UserId(2)).is_none());
        assert!(slow.is_closed());
        assert_eq!(hub.stats().evicted_connections, 1);
        assert_eq!(healthy_rx.recv().await, Some(WireFrame::Text("news".into())));
    }

    #[tokio::test]
    async fn test_duplicate_login_evicts_previous_session() {
        let hub = hub();
        let (first, mut first_rx) = connection("first", 4);
        let (second, _second_rx) = connection("second", 4);
        hub.register(first.clone());
        hub.register(second.clone());

        hub.associate_user(UserId(9), &first).await.unwrap();
        hub.associate_user(UserId(9), &second).await.unwrap();

        let bound = hub.lookup_by_user(UserId(9)).unwrap();
        assert_eq!(bound.id(), second.id());
        assert!(!hub.contains(first.id()));
        assert!(first.is_closed());
        assert_eq!(first.user_id(), None);
        assert_eq!(second.state(), ConnectionState::Authenticated);

        let Some(WireFrame::Text(text)) = first_rx.recv().await else {
            panic!("expected replacement notice");
        };
        let notice = codec::decode_response_text(&text).unwrap();
        assert_eq!(notice.code(), ResponseCode::Conflict);
        assert_eq!(notice.message(), SESSION_REPLACED);

        // The displaced session's own cleanup leaves the new binding alone.
        hub.unregister(&first).await;
        assert!(hub.lookup_by_user(UserId(9)).is_some());
    }

    #[tokio::test]
    async fn test_relogin_as_other_user_releases_previous() {
        let status = Arc::new(RecordingStatus::default());
        let hub = hub_with(status.clone());
        let (conn, _rx) = connection("c1", 4);
        hub.register(conn.clone());

        hub.associate_user(UserId(1), &conn).await.unwrap();
        hub.associate_user(UserId(2), &conn).await.unwrap();

        assert!(hub.lookup_by_user(UserId(1)).is_none());
        assert_eq!(hub.lookup_by_user(UserId(2)).unwrap().id(), conn.id());
        assert!(status.events.lock().unwrap().contains(&(UserId(1), false)));
    }

    #[tokio::test]
    async fn test_release_user() {
        let hub = hub();
        let (conn, _rx) = connection("c1", 4);
        hub.register(conn.clone());
        hub.associate_user(UserId(3), &conn).await.unwrap();

        assert_eq!(hub.release_user(&conn).await, Some(UserId(3)));
        assert_eq!(conn.state(), ConnectionState::Open);
        assert!(hub.lookup_by_user(UserId(3)).is_none());
        assert!(hub.contains(conn.id()));
        assert_eq!(hub.release_user(&conn).await, None);
    }

    #[tokio::test]
    async fn test_associate_after_unregister_fails() {
        let hub = hub();
        let (conn, _rx) = connection("c1", 4);
        hub.register(conn.clone());
        hub.unregister(&conn).await;

        let err = hub.associate_user(UserId(4), &conn).await.unwrap_err();
        assert_eq!(err.code(), ResponseCode::Conflict);
        assert!(hub.lookup_by_user(UserId(4)).is_none());
    }

    #[tokio::test]
    async fn test_send_to_user() {
        let hub = hub();
        let (conn, mut rx) = connection("c1", 4);
        hub.register(conn.clone());
        hub.associate_user(UserId(5), &conn).await.unwrap();

        assert!(hub.send_to_user(UserId(5), WireFrame::Text("hi".into())).await);
        assert!(!hub.send_to_user(UserId(6), WireFrame::Text("hi".into())).await);
        assert_eq!(rx.recv().await, Some(WireFrame::Text("hi".into())));
    }

    #[tokio::test]
    async fn test_eviction_during_login_leaves_user_offline() {
        let status = Arc::new(GatedStatus::default());
        let hub = hub_with(status.clone());
        let (conn, _rx) = connection("c1", 1);
        hub.register(conn.clone());
        conn.enqueue(WireFrame::Text("filler".into())).unwrap();

        let login = tokio::spawn({
            let hub = hub.clone();
            let conn = conn.clone();
            async move { hub.associate_user(UserId(9), &conn).await }
        });
        status.entered.notified().await;

        // The queue is full, so the broadcast drops the connection mid-login.
        let broadcast = tokio::spawn({
            let hub = hub.clone();
            async move { hub.broadcast(WireFrame::Text("news".into())).await }
        });
        while hub.contains(conn.id()) {
            tokio::task::yield_now().await;
        }

        status.release.notify_one();
        login.await.unwrap().unwrap();
        assert_eq!(broadcast.await.unwrap(), 0);

        assert!(hub.lookup_by_user(UserId(9)).is_none());
        let events = status.events.lock().unwrap().clone();
        assert_eq!(events, vec![(UserId(9), true), (UserId(9), false)]);
    }
}
