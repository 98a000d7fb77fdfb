//! Capabilities the core consumes from the service layer.
//!
//! Business logic (accounts, equipment, friends, rankings) lives outside the
//! core. The core only needs to authenticate a login, register an account
//! and record whether a user is online; everything else reaches it through
//! [`Handler`](crate::router::Handler) implementations.

use async_trait::async_trait;
use gamehub_protocol::ResponseCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// An authenticated account identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for UserId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// A typed failure returned by a handler or service call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    /// The request payload could not be interpreted.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    /// Persistence or other unexpected failure. The detail is logged, never
    /// sent to the client.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Response code reported to the client.
    #[must_use]
    pub fn code(&self) -> ResponseCode {
        match self {
            ServiceError::InvalidPayload(_) => ResponseCode::BadRequest,
            ServiceError::Unauthorized(_) => ResponseCode::Unauthorized,
            ServiceError::Forbidden(_) => ResponseCode::Forbidden,
            ServiceError::NotFound(_) => ResponseCode::NotFound,
            ServiceError::Conflict(_) => ResponseCode::Conflict,
            ServiceError::Validation(_) => ResponseCode::Validation,
            ServiceError::Internal(_) => ResponseCode::Internal,
        }
    }

    /// Message reported to the client.
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            ServiceError::InvalidPayload(m)
            | ServiceError::Unauthorized(m)
            | ServiceError::Forbidden(m)
            | ServiceError::NotFound(m)
            | ServiceError::Conflict(m)
            | ServiceError::Validation(m) => m.clone(),
            ServiceError::Internal(_) => "internal server error".to_string(),
        }
    }

    /// Shorthand for a payload that failed to deserialize.
    pub fn invalid_payload(err: impl fmt::Display) -> Self {
        ServiceError::InvalidPayload(err.to_string())
    }
}

/// Result of a successful login.
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub user_id: UserId,
    /// Returned to the client as the response payload.
    pub profile: Value,
}

/// Credential checks for the built-in `auth` handlers.
#[async_trait]
pub trait Authenticator: Send + Sync + 'static {
    async fn login(&self, credentials: &Value) -> Result<LoginOutcome, ServiceError>;

    async fn register(&self, details: &Value) -> Result<Value, ServiceError>;
}

/// Persistent online/offline flag per user, maintained independently of the
/// connection lifecycle.
#[async_trait]
pub trait OnlineStatus: Send + Sync + 'static {
    async fn set_online(&self, user: UserId) -> Result<(), ServiceError>;

    async fn set_offline(&self, user: UserId) -> Result<(), ServiceError>;

    /// Mark every user offline. Called once at startup, before any
    /// connection is accepted.
    async fn reset_all(&self) -> Result<(), ServiceError> {
        Ok(())
    }
}

/// An [`OnlineStatus`] that records nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopOnlineStatus;

#[async_trait]
impl OnlineStatus for NoopOnlineStatus {
    async fn set_online(&self, _user: UserId) -> Result<(), ServiceError> {
        Ok(())
    }

    async fn set_offline(&self, _user: UserId) -> Result<(), ServiceError> {
        Ok(())
    }
}
