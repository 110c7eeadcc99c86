//! WebSocket Utilities - helpers shared by the writer tasks

use axum::extract::ws::{Message, Utf8Bytes, WebSocket};
use futures_util::SinkExt;
use futures_util::stream::SplitSink;
use serde::Serialize;
use tracing::error;

/// Serializes `frame` and sends it as one text frame.
pub async fn send_json<T: Serialize>(
    websocket_tx: &mut SplitSink<WebSocket, Message>,
    frame: &T,
) -> Result<(), axum::Error> {
    let json = serde_json::to_string(frame).map_err(|e| {
        error!("Failed to serialize frame: {:?}", e);
        axum::Error::new(e)
    })?;
    websocket_tx
        .send(Message::Text(Utf8Bytes::from(json)))
        .await
        .map_err(|e| {
            error!("Failed to send frame through WebSocket: {:?}", e);
            e
        })
}
