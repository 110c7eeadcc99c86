//! WebSocket Module - real-time gateway
//!
//! - `ws/chat/{roomId}/`: a participant's live view of one room
//! - `ws/global/`: notifications for messages in rooms the user is not viewing
//!
//! Both endpoints authenticate (and, for rooms, authorize) before upgrading, so a
//! refused client gets a plain HTTP error and no socket.

pub mod chatmap;
pub mod connection;
pub mod event_handlers;
pub mod fanout;
pub mod presence;
pub mod usermap;
pub mod utils;

pub use connection::{GlobalConnection, RoomConnection};

use crate::core::{AppError, AppState, extract_credential};
use crate::entities::RoomId;
use axum::extract::{Path, State, ws::WebSocketUpgrade};
use axum::http::{HeaderMap, Uri};
use axum::response::Response;
use connection::{handle_global_socket, handle_room_socket};
use std::sync::Arc;

/// Frames a room connection may fall behind before it starts missing some
pub const BROADCAST_CHANNEL_CAPACITY: usize = 128;
/// Default idle timeout of a bound connection
pub const TIMEOUT_DURATION_SECONDS: u64 = 300;
pub const PING_INTERVAL_SECONDS: u64 = 30;
/// Minimum spacing between two inbound chat frames of one connection
pub const RATE_LIMITER_MILLIS: u64 = 10;
pub const SHUTDOWN_GRACE_MILLIS: u64 = 1000;

pub async fn room_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(rid): Path<RoomId>,
    headers: HeaderMap,
    uri: Uri,
) -> Result<Response, AppError> {
    let credential = extract_credential(&headers, &uri);
    let connection = RoomConnection::open(state, rid, credential.as_deref()).await?;

    // dropping the closure on a failed upgrade drops the binding with it
    Ok(ws.on_upgrade(move |socket| handle_room_socket(socket, connection)))
}

pub async fn global_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    uri: Uri,
) -> Result<Response, AppError> {
    let credential = extract_credential(&headers, &uri);
    let connection = GlobalConnection::open(state, credential.as_deref())?;

    Ok(ws.on_upgrade(move |socket| handle_global_socket(socket, connection)))
}
