#![allow(dead_code)]

use axum_test::TestServer;
use futures_util::StreamExt;
use market_server::core::{AppState, encode_jwt};
use sqlx::SqlitePool;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

pub const JWT_SECRET: &str = "marketplace-integration-secret";

pub const SELLER: &str = "seller-sam";
pub const BUYER: &str = "buyer-bea";
pub const OUTSIDER: &str = "outsider-olga";

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Creates an AppState for the tests
pub fn create_test_state(pool: SqlitePool) -> Arc<AppState> {
    Arc::new(AppState::new(pool, JWT_SECRET.to_string()))
}

/// Creates an in-process TestServer for HTTP tests
pub fn create_test_server(state: Arc<AppState>) -> TestServer {
    let app = market_server::create_router(state);
    TestServer::new(app).expect("Failed to create test server")
}

/// Valid token (verified email, 24h) for `uid`
pub fn create_test_jwt(uid: &str) -> String {
    encode_jwt(uid, true, chrono::Duration::hours(24), JWT_SECRET).expect("Failed to create JWT token")
}

pub fn bearer(uid: &str) -> String {
    format!("Bearer {}", create_test_jwt(uid))
}

/// Serves the router on an ephemeral local port, for real WebSocket clients.
pub async fn spawn_server(state: Arc<AppState>) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test listener");
    let addr = listener.local_addr().expect("local address");
    let app = market_server::create_router(state);
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("test server crashed");
    });
    addr
}

pub fn room_url(addr: SocketAddr, rid: i64, uid: &str) -> String {
    format!("ws://{}/ws/chat/{}/?token={}", addr, rid, create_test_jwt(uid))
}

pub fn global_url(addr: SocketAddr, uid: &str) -> String {
    format!("ws://{}/ws/global/?token={}", addr, create_test_jwt(uid))
}

pub async fn connect(url: &str) -> WsClient {
    let (ws, _) = tokio_tungstenite::connect_async(url)
        .await
        .expect("WebSocket handshake failed");
    ws
}

/// HTTP status of a refused handshake
pub async fn refused_status(url: &str) -> u16 {
    match tokio_tungstenite::connect_async(url).await {
        Ok(_) => panic!("handshake should have been refused"),
        Err(tokio_tungstenite::tungstenite::Error::Http(response)) => response.status().as_u16(),
        Err(e) => panic!("unexpected handshake error: {:?}", e),
    }
}

pub fn chat_frame(message: &str, sender: &str) -> Message {
    Message::Text(serde_json::json!({ "message": message, "sender": sender }).to_string())
}

/// Next text frame as JSON, skipping control frames.
pub async fn next_json(ws: &mut WsClient) -> serde_json::Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .expect("WebSocket error");
        match msg {
            Message::Text(text) => return serde_json::from_str(&text).expect("frame is JSON"),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {:?}", other),
        }
    }
}

/// Fails if a text frame arrives within `wait`.
pub async fn assert_no_frame(ws: &mut WsClient, wait: Duration) {
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        match tokio::time::timeout_at(deadline, ws.next()).await {
            Err(_) => return,
            Ok(Some(Ok(Message::Text(text)))) => panic!("unexpected frame: {}", text),
            Ok(Some(Ok(_))) => continue,
            Ok(_) => return,
        }
    }
}

/// Waits until the socket is closed by the server.
pub async fn wait_closed(ws: &mut WsClient) {
    loop {
        match tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("server did not close the connection")
        {
            None | Some(Err(_)) | Some(Ok(Message::Close(_))) => return,
            Some(Ok(_)) => continue,
        }
    }
}

/// Polls `condition` until it holds; cleanup after a disconnect runs asynchronously.
pub async fn eventually(condition: impl Fn() -> bool) {
    for _ in 0..100 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached in time");
}
