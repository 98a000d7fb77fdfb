//! Built-in `heartbeat` and `auth` handlers.

use async_trait::async_trait;
use gamehub_protocol::{action, category, unix_millis, Message};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

use crate::router::{Handler, RequestContext, RouterBuilder};
use crate::service::{Authenticator, ServiceError};

/// Add the built-in routes to `builder`.
pub fn install(builder: RouterBuilder, authenticator: Arc<dyn Authenticator>) -> RouterBuilder {
    builder
        .route(category::HEARTBEAT, action::PING, Ping)
        .route(
            category::AUTH,
            action::LOGIN,
            Login {
                authenticator: authenticator.clone(),
            },
        )
        .route(category::AUTH, action::REGISTER, Register { authenticator })
        .route(category::AUTH, action::LOGOUT, Logout)
}

/// `heartbeat:ping`, answered with the server clock in unix milliseconds.
pub struct Ping;

#[async_trait]
impl Handler for Ping {
    async fn call(&self, _ctx: &RequestContext, _msg: &Message) -> Result<Value, ServiceError> {
        Ok(json!({ "pong": unix_millis() }))
    }
}

pub struct Login {
    authenticator: Arc<dyn Authenticator>,
}

#[async_trait]
impl Handler for Login {
    async fn call(&self, ctx: &RequestContext, msg: &Message) -> Result<Value, ServiceError> {
        let outcome = self.authenticator.login(&msg.payload).await?;
        ctx.authenticate(outcome.user_id).await?;
        info!(user = %outcome.user_id, connection = %ctx.connection_id(), "Login succeeded");
        Ok(outcome.profile)
    }
}

pub struct Register {
    authenticator: Arc<dyn Authenticator>,
}

#[async_trait]
impl Handler for Register {
    async fn call(&self, _ctx: &RequestContext, msg: &Message) -> Result<Value, ServiceError> {
        self.authenticator.register(&msg.payload).await
    }
}

/// `auth:logout`. The session closes once this reply is written.
pub struct Logout;

#[async_trait]
impl Handler for Logout {
    async fn call(&self, ctx: &RequestContext, _msg: &Message) -> Result<Value, ServiceError> {
        let user = ctx.logout().await;
        Ok(json!({ "userId": user }))
    }
}
