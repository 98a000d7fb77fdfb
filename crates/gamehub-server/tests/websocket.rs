//! Runs the real axum endpoint against a WebSocket client.

use futures_util::{SinkExt, StreamExt};
use gamehub_protocol::{codec, ResponseCode};
use gamehub_server::{app, AppState, Config};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start(config: Config) -> (SocketAddr, Arc<AppState>) {
    let state = Arc::new(AppState::new(config));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = app(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (addr, state)
}

async fn call(
    client: &mut Client,
    category: &str,
    action: &str,
    id: &str,
    payload: Value,
) -> gamehub_protocol::Response {
    let request = json!({
        "category": category,
        "action": action,
        "correlationId": id,
        "payload": payload,
    });
    client
        .send(Message::Text(request.to_string()))
        .await
        .unwrap();

    loop {
        match client.next().await.unwrap().unwrap() {
            Message::Text(text) => return codec::decode_response_text(&text).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

#[tokio::test]
async fn register_login_and_read_profile() {
    let (addr, state) = start(Config::default()).await;
    let (mut client, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();

    let ping = call(&mut client, "heartbeat", "ping", "abc", Value::Null).await;
    assert!(ping.is_success());
    assert_eq!(ping.correlation_id(), "abc");

    let denied = call(&mut client, "player", "getInfo", "x1", Value::Null).await;
    assert_eq!(denied.code(), ResponseCode::Unauthorized);
    assert_eq!(denied.correlation_id(), "x1");

    let credentials = json!({ "username": "alice", "password": "hunter22" });
    let registered = call(&mut client, "auth", "register", "r1", credentials.clone()).await;
    assert!(registered.is_success());

    let login = call(&mut client, "auth", "login", "l1", credentials).await;
    assert!(login.is_success());
    assert_eq!(login.payload().unwrap()["username"], "alice");

    let info = call(&mut client, "player", "getInfo", "g1", Value::Null).await;
    assert!(info.is_success());
    assert_eq!(info.payload().unwrap()["nickname"], "alice");

    let updated = call(
        &mut client,
        "player",
        "update",
        "u1",
        json!({ "nickname": "Alice" }),
    )
    .await;
    assert!(updated.is_success());
    let info = call(&mut client, "player", "getInfo", "g2", Value::Null).await;
    assert_eq!(info.payload().unwrap()["nickname"], "Alice");

    assert_eq!(state.hub.len(), 1);
    assert_eq!(state.directory.online_count(), 1);
}

#[tokio::test]
async fn unknown_route_is_bad_request() {
    let (addr, _state) = start(Config::default()).await;
    let (mut client, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();

    let credentials = json!({ "username": "bob", "password": "password" });
    call(&mut client, "auth", "register", "r", credentials.clone()).await;
    call(&mut client, "auth", "login", "l", credentials).await;

    let response = call(&mut client, "equip", "getEquip", "e1", Value::Null).await;
    assert_eq!(response.code(), ResponseCode::BadRequest);
    assert_eq!(response.message(), "unknown route equip:getEquip");
}

#[tokio::test]
async fn disallowed_origin_is_refused() {
    let mut config = Config::default();
    config.transport.allowed_origins = vec!["https://play.example.com".into()];
    let (addr, _state) = start(config).await;

    let mut request = format!("ws://{addr}/ws").into_client_request().unwrap();
    request
        .headers_mut()
        .insert("origin", HeaderValue::from_static("https://evil.example"));
    assert!(connect_async(request).await.is_err());

    let mut request = format!("ws://{addr}/ws").into_client_request().unwrap();
    request
        .headers_mut()
        .insert("origin", HeaderValue::from_static("https://play.example.com"));
    assert!(connect_async(request).await.is_ok());
}

#[tokio::test]
async fn health_reports_connections() {
    let (addr, _state) = start(Config::default()).await;
    let (mut client, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    // The session is registered once it answers.
    call(&mut client, "heartbeat", "ping", "h", Value::Null).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut raw = String::new();
    stream.read_to_string(&mut raw).await.unwrap();

    assert!(raw.starts_with("HTTP/1.1 200"));
    let body = raw.split("\r\n\r\n").nth(1).unwrap();
    let health: Value = serde_json::from_str(body).unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["connections"], 1);
}
