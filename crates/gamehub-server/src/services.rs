//! In-memory development service layer.
//!
//! Stands in for the persistence tier: an account directory that
//! authenticates logins and tracks the online flag, and the `player`
//! handlers that read profiles through the [`TtlCache`].

use async_trait::async_trait;
use gamehub_core::{
    Authenticator, CacheStats, Handler, LoginOutcome, OnlineStatus, RequestContext,
    RouterBuilder, ServiceError, TtlCache, UserId,
};
use gamehub_protocol::{action, category, unix_seconds, Message};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

/// Public profile of a player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerInfo {
    pub user_id: UserId,
    pub username: String,
    pub nickname: String,
    pub created_at: i64,
}

#[derive(Debug)]
struct Account {
    password: String,
    online: bool,
    info: PlayerInfo,
}

#[derive(Debug, Default)]
struct Accounts {
    by_id: HashMap<UserId, Account>,
    by_name: HashMap<String, UserId>,
    next_id: u64,
}

#[derive(Debug, Deserialize)]
struct Credentials {
    username: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct Registration {
    username: String,
    password: String,
    #[serde(default)]
    nickname: Option<String>,
}

/// Fields a player may change on their own profile.
#[derive(Debug, Default, Deserialize)]
pub struct PlayerUpdate {
    #[serde(default)]
    pub nickname: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InfoQuery {
    #[serde(default)]
    user_id: Option<UserId>,
}

fn parse<T: DeserializeOwned>(payload: &Value) -> Result<T, ServiceError> {
    serde_json::from_value(payload.clone()).map_err(ServiceError::invalid_payload)
}

fn parse_or_default<T: DeserializeOwned + Default>(payload: &Value) -> Result<T, ServiceError> {
    if payload.is_null() {
        Ok(T::default())
    } else {
        parse(payload)
    }
}

fn validate_nickname(nickname: &str) -> Result<(), ServiceError> {
    let len = nickname.chars().count();
    if len == 0 || len > 32 {
        return Err(ServiceError::Validation(
            "nickname must be 1 to 32 characters".into(),
        ));
    }
    Ok(())
}

/// Account directory kept in process memory.
///
/// Passwords are compared as given.
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    accounts: RwLock<Accounts>,
}

impl MemoryDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Accounts> {
        self.accounts.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Accounts> {
        self.accounts.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create an account.
    ///
    /// # Errors
    ///
    /// Fails with `Validation` for malformed fields and `Conflict` if the
    /// username is taken.
    pub fn create_account(
        &self,
        username: &str,
        password: &str,
        nickname: Option<&str>,
    ) -> Result<PlayerInfo, ServiceError> {
        let username_len = username.chars().count();
        if !(3..=32).contains(&username_len) {
            return Err(ServiceError::Validation(
                "username must be 3 to 32 characters".into(),
            ));
        }
        if password.len() < 6 {
            return Err(ServiceError::Validation(
                "password must be at least 6 characters".into(),
            ));
        }
        let nickname = nickname.unwrap_or(username);
        validate_nickname(nickname)?;

        let mut accounts = self.write();
        if accounts.by_name.contains_key(username) {
            return Err(ServiceError::Conflict("username already taken".into()));
        }

        accounts.next_id += 1;
        let user_id = UserId(accounts.next_id);
        let info = PlayerInfo {
            user_id,
            username: username.to_string(),
            nickname: nickname.to_string(),
            created_at: unix_seconds(),
        };
        accounts.by_name.insert(username.to_string(), user_id);
        accounts.by_id.insert(
            user_id,
            Account {
                password: password.to_string(),
                online: false,
                info: info.clone(),
            },
        );

        info!(user = %user_id, username = %username, "Account created");
        Ok(info)
    }

    /// Load a profile.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown user.
    pub fn player(&self, user: UserId) -> Result<PlayerInfo, ServiceError> {
        self.read()
            .by_id
            .get(&user)
            .map(|account| account.info.clone())
            .ok_or_else(|| ServiceError::NotFound(format!("player {user} not found")))
    }

    /// Apply `update` to a profile.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown user and `Validation` for a bad
    /// nickname.
    pub fn update_player(&self, user: UserId, update: PlayerUpdate) -> Result<PlayerInfo, ServiceError> {
        if let Some(nickname) = &update.nickname {
            validate_nickname(nickname)?;
        }
        let mut accounts = self.write();
        let account = accounts
            .by_id
            .get_mut(&user)
            .ok_or_else(|| ServiceError::NotFound(format!("player {user} not found")))?;
        if let Some(nickname) = update.nickname {
            account.info.nickname = nickname;
        }
        Ok(account.info.clone())
    }

    #[must_use]
    pub fn is_online(&self, user: UserId) -> bool {
        self.read()
            .by_id
            .get(&user)
            .is_some_and(|account| account.online)
    }

    #[must_use]
    pub fn online_count(&self) -> usize {
        self.read()
            .by_id
            .values()
            .filter(|account| account.online)
            .count()
    }

    fn set_flag(&self, user: UserId, online: bool) -> Result<(), ServiceError> {
        let mut accounts = self.write();
        let account = accounts
            .by_id
            .get_mut(&user)
            .ok_or_else(|| ServiceError::NotFound(format!("player {user} not found")))?;
        account.online = online;
        Ok(())
    }
}

#[async_trait]
impl Authenticator for MemoryDirectory {
    async fn login(&self, credentials: &Value) -> Result<LoginOutcome, ServiceError> {
        let credentials: Credentials = parse(credentials)?;
        let accounts = self.read();

        let account = accounts
            .by_name
            .get(&credentials.username)
            .and_then(|id| accounts.by_id.get(id))
            .filter(|account| account.password == credentials.password)
            .ok_or_else(|| ServiceError::Unauthorized("invalid username or password".into()))?;

        Ok(LoginOutcome {
            user_id: account.info.user_id,
            profile: json!(account.info),
        })
    }

    async fn register(&self, details: &Value) -> Result<Value, ServiceError> {
        let registration: Registration = parse(details)?;
        let info = self.create_account(
            &registration.username,
            &registration.password,
            registration.nickname.as_deref(),
        )?;
        Ok(json!({ "userId": info.user_id }))
    }
}

#[async_trait]
impl OnlineStatus for MemoryDirectory {
    async fn set_online(&self, user: UserId) -> Result<(), ServiceError> {
        self.set_flag(user, true)
    }

    async fn set_offline(&self, user: UserId) -> Result<(), ServiceError> {
        self.set_flag(user, false)
    }

    async fn reset_all(&self) -> Result<(), ServiceError> {
        let mut accounts = self.write();
        for account in accounts.by_id.values_mut() {
            account.online = false;
        }
        info!(accounts = accounts.by_id.len(), "All users marked offline");
        Ok(())
    }
}

/// Player profile reads and writes, cached by user id.
pub struct PlayerService {
    directory: Arc<MemoryDirectory>,
    cache: Arc<TtlCache<UserId, PlayerInfo>>,
}

impl PlayerService {
    pub fn new(directory: Arc<MemoryDirectory>, cache: Arc<TtlCache<UserId, PlayerInfo>>) -> Self {
        Self { directory, cache }
    }

    /// Profile of `user`, served from cache when fresh.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown user.
    pub async fn get_info(&self, user: UserId) -> Result<PlayerInfo, ServiceError> {
        self.cache
            .get_or_try_load(user, || async { self.directory.player(user) })
            .await
    }

    /// Update `user`'s profile and invalidate the cached copy.
    ///
    /// # Errors
    ///
    /// See [`MemoryDirectory::update_player`].
    pub fn update(&self, user: UserId, update: PlayerUpdate) -> Result<PlayerInfo, ServiceError> {
        let info = self.directory.update_player(user, update)?;
        self.cache.delete(&user);
        debug!(user = %user, "Player cache invalidated");
        Ok(info)
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<TtlCache<UserId, PlayerInfo>> {
        &self.cache
    }

    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

struct GetInfo {
    players: Arc<PlayerService>,
}

#[async_trait]
impl Handler for GetInfo {
    async fn call(&self, ctx: &RequestContext, msg: &Message) -> Result<Value, ServiceError> {
        let caller = ctx.require_user()?;
        let query: InfoQuery = parse_or_default(&msg.payload)?;
        let info = self.players.get_info(query.user_id.unwrap_or(caller)).await?;
        Ok(json!(info))
    }
}

struct UpdateInfo {
    players: Arc<PlayerService>,
}

#[async_trait]
impl Handler for UpdateInfo {
    async fn call(&self, ctx: &RequestContext, msg: &Message) -> Result<Value, ServiceError> {
        let user = ctx.require_user()?;
        let update: PlayerUpdate = parse_or_default(&msg.payload)?;
        let info = self.players.update(user, update)?;
        Ok(json!(info))
    }
}

/// Register the `player` routes.
pub fn install(builder: RouterBuilder, players: Arc<PlayerService>) -> RouterBuilder {
    builder
        .route(
            category::PLAYER,
            action::GET_INFO,
            GetInfo {
                players: players.clone(),
            },
        )
        .route(category::PLAYER, action::UPDATE, UpdateInfo { players })
}
