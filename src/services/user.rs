//! User services - block list

use crate::core::{AppError, AppState, AuthenticatedUser, ChatError};
use crate::entities::Identity;
use crate::repositories::Read;
use axum::{
    Extension,
    extract::{Path, State},
    http::StatusCode,
};
use axum_macros::debug_handler;
use std::sync::Arc;
use tracing::{info, instrument, warn};

#[debug_handler]
#[instrument(skip(state, current_user), fields(uid = %current_user.0))]
pub async fn block_user(
    State(state): State<Arc<AppState>>,
    Extension(current_user): Extension<AuthenticatedUser>,
    Path(blocked_uid): Path<Identity>,
) -> Result<StatusCode, AppError> {
    // 1. Record the block
    // 2. Delete every room shared by the two users, messages included
    // 3. Close the live room connections of the deleted rooms
    if blocked_uid == current_user.0 {
        warn!("User tried to block themselves");
        return Err(AppError::bad_request("Cannot block yourself"));
    }
    if state.user.read(&blocked_uid).await?.is_none() {
        return Err(ChatError::NotFound("user").into());
    }

    state.user.block(&current_user.0, &blocked_uid).await?;

    let removed = state
        .room
        .delete_between(&current_user.0, &blocked_uid)
        .await?;
    for rid in &removed {
        state.chats_online.close(*rid);
    }

    info!(rooms_removed = removed.len(), "User blocked");
    Ok(StatusCode::NO_CONTENT)
}
