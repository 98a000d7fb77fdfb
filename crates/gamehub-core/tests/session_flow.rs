//! End-to-end session behaviour over the in-memory transport.

use async_trait::async_trait;
use gamehub_core::hub::SESSION_REPLACED;
use gamehub_core::{
    handler_fn, handlers, serve, Authenticator, CloseReason, Hub, HubConfig, LoginOutcome,
    MessageRouter, NoopOnlineStatus, RateLimiter, ServiceError, UserId,
};
use gamehub_protocol::{codec, Response, ResponseCode};
use gamehub_transport::memory::{duplex, MemoryClient};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;

struct Accounts;

#[async_trait]
impl Authenticator for Accounts {
    async fn login(&self, credentials: &Value) -> Result<LoginOutcome, ServiceError> {
        let user_id = credentials["userId"]
            .as_u64()
            .ok_or_else(|| ServiceError::InvalidPayload("userId required".into()))?;
        Ok(LoginOutcome {
            user_id: UserId(user_id),
            profile: json!({ "userId": user_id }),
        })
    }

    async fn register(&self, _details: &Value) -> Result<Value, ServiceError> {
        Ok(Value::Null)
    }
}

struct Harness {
    hub: Hub,
    player_calls: Arc<AtomicUsize>,
}

fn harness() -> Harness {
    let limiter = Arc::new(RateLimiter::new());
    let player_calls = Arc::new(AtomicUsize::new(0));
    let counter = player_calls.clone();

    let router = handlers::install(
        MessageRouter::builder().with_standard_middleware(limiter.clone()),
        Arc::new(Accounts),
    )
    .route(
        "player",
        "getInfo",
        handler_fn(move |ctx, _msg| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                let user = ctx.require_user()?;
                Ok(json!({ "userId": user }))
            }
        }),
    )
    .route(
        "debug",
        "panic",
        handler_fn(|_ctx, msg: gamehub_protocol::Message| async move {
            if msg.action == "panic" {
                panic!("boom");
            }
            Ok(Value::Null)
        }),
    )
    .build();

    let hub = Hub::new(
        HubConfig::default(),
        router,
        limiter,
        Arc::new(NoopOnlineStatus),
    );
    Harness { hub, player_calls }
}

fn connect(hub: &Hub) -> (MemoryClient, JoinHandle<CloseReason>) {
    let (source, sink, client) = duplex(32);
    let session = tokio::spawn(serve(hub.clone(), source, sink));
    (client, session)
}

async fn request(client: &mut MemoryClient, text: &str) -> Response {
    client.send_text(text).await.unwrap();
    let reply = client.recv_text().await.expect("session closed");
    codec::decode_response_text(&reply).unwrap()
}

async fn login(client: &mut MemoryClient, user: u64) -> Response {
    request(
        client,
        &format!(
            r#"{{"category":"auth","action":"login","correlationId":"login-{user}","payload":{{"userId":{user}}}}}"#
        ),
    )
    .await
}

#[tokio::test]
async fn heartbeat_echoes_correlation_id() {
    let Harness { hub, .. } = harness();
    let (mut client, _session) = connect(&hub);

    let response = request(
        &mut client,
        r#"{"category":"heartbeat","action":"ping","correlationId":"abc"}"#,
    )
    .await;

    assert!(response.is_success());
    assert_eq!(response.code(), ResponseCode::Success);
    assert_eq!(response.correlation_id(), "abc");
    assert!(response.payload().unwrap()["pong"].is_i64());
}

#[tokio::test]
async fn protected_route_requires_login() {
    let Harness { hub, player_calls } = harness();
    let (mut client, _session) = connect(&hub);

    let response = request(
        &mut client,
        r#"{"category":"player","action":"getInfo","correlationId":"x1"}"#,
    )
    .await;
    assert_eq!(response.code(), ResponseCode::Unauthorized);
    assert_eq!(response.correlation_id(), "x1");
    assert_eq!(player_calls.load(Ordering::SeqCst), 0);

    assert!(login(&mut client, 11).await.is_success());
    let response = request(
        &mut client,
        r#"{"category":"player","action":"getInfo","correlationId":"x2"}"#,
    )
    .await;
    assert!(response.is_success());
    assert_eq!(response.payload(), Some(&json!({ "userId": 11 })));
    assert_eq!(player_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn malformed_frame_keeps_connection_open() {
    let Harness { hub, .. } = harness();
    let (mut client, _session) = connect(&hub);

    let response = request(&mut client, "{not json").await;
    assert_eq!(response.code(), ResponseCode::BadRequest);
    assert_eq!(response.correlation_id(), "");

    let response = request(
        &mut client,
        r#"{"category":"heartbeat","action":"ping","correlationId":"after"}"#,
    )
    .await;
    assert!(response.is_success());
    assert_eq!(hub.len(), 1);
}

#[tokio::test]
async fn handler_panic_keeps_connection_open() {
    let Harness { hub, .. } = harness();
    let (mut client, _session) = connect(&hub);
    login(&mut client, 5).await;

    let response = request(
        &mut client,
        r#"{"category":"debug","action":"panic","correlationId":"p1"}"#,
    )
    .await;
    assert_eq!(response.code(), ResponseCode::Internal);
    assert_eq!(response.correlation_id(), "p1");

    let response = request(
        &mut client,
        r#"{"category":"heartbeat","action":"ping","correlationId":"p2"}"#,
    )
    .await;
    assert!(response.is_success());
}

#[tokio::test]
async fn duplicate_login_evicts_first_session() {
    let Harness { hub, .. } = harness();
    let (mut first, first_session) = connect(&hub);
    let (mut second, _second_session) = connect(&hub);

    assert!(login(&mut first, 77).await.is_success());
    assert!(login(&mut second, 77).await.is_success());

    let notice = codec::decode_response_text(&first.recv_text().await.unwrap()).unwrap();
    assert_eq!(notice.code(), ResponseCode::Conflict);
    assert_eq!(notice.message(), SESSION_REPLACED);
    assert_eq!(first_session.await.unwrap(), CloseReason::Closed);

    assert_eq!(hub.len(), 1);
    assert!(hub.lookup_by_user(UserId(77)).is_some());
    let response = request(
        &mut second,
        r#"{"category":"player","action":"getInfo","correlationId":"still-here"}"#,
    )
    .await;
    assert!(response.is_success());
}

#[tokio::test]
async fn logout_closes_after_reply() {
    let Harness { hub, .. } = harness();
    let (mut client, session) = connect(&hub);
    login(&mut client, 3).await;

    let response = request(
        &mut client,
        r#"{"category":"auth","action":"logout","correlationId":"bye"}"#,
    )
    .await;
    assert!(response.is_success());
    assert_eq!(session.await.unwrap(), CloseReason::Logout);
    assert!(hub.is_empty());
    assert!(hub.lookup_by_user(UserId(3)).is_none());
}

#[tokio::test]
async fn disconnect_releases_user() {
    let Harness { hub, .. } = harness();
    let (mut client, session) = connect(&hub);
    login(&mut client, 8).await;
    assert!(hub.lookup_by_user(UserId(8)).is_some());

    client.disconnect();
    assert_eq!(session.await.unwrap(), CloseReason::ClientClosed);
    assert!(hub.lookup_by_user(UserId(8)).is_none());
    assert_eq!(hub.stats().total_connections, 1);
}
