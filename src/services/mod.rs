//! Services module - HTTP handlers
//!
//! - `room`: room directory, conversation list and history
//! - `user`: block list

pub mod room;
pub mod user;

pub use room::{get_messages, get_or_create_room, get_room, get_rooms};
pub use user::block_user;

use crate::core::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse};
use std::sync::Arc;

/// Root endpoint - health check
pub async fn root(State(_state): State<Arc<AppState>>) -> impl IntoResponse {
    (StatusCode::OK, "Server is running!")
}
