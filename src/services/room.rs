//! Room services - room directory, conversation list and history

use crate::core::{AppError, AppState, AuthenticatedUser, ChatError};
use crate::dtos::{
    CreateRoomDTO, CreatedRoomDTO, MessageDTO, MessagesDTO, RoomDTO, RoomSummaryDTO, RoomsDTO,
};
use crate::entities::{RoomDetails, RoomId};
use crate::repositories::Read;
use axum::{
    Extension,
    extract::{Json, Path, State},
    http::StatusCode,
};
use axum_macros::debug_handler;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use validator::Validate;

/// Loads a room and checks that `identity` takes part in it.
async fn participant_room(
    state: &AppState,
    identity: &str,
    rid: RoomId,
) -> Result<RoomDetails, ChatError> {
    let details = state
        .room
        .find_details(rid)
        .await?
        .ok_or(ChatError::RoomNotFound)?;

    if !details.is_participant(identity) {
        warn!("Identity is not part of the room");
        return Err(ChatError::AuthorizationDenied);
    }
    Ok(details)
}

#[instrument(skip(state, current_user), fields(uid = %current_user.0))]
pub async fn get_rooms(
    State(state): State<Arc<AppState>>,
    Extension(current_user): Extension<AuthenticatedUser>,
) -> Result<Json<RoomsDTO>, AppError> {
    debug!("Listing rooms for user");
    let rooms: Vec<RoomSummaryDTO> = state
        .room
        .find_summaries_for(&current_user.0)
        .await?
        .into_iter()
        .map(RoomSummaryDTO::from)
        .collect();

    info!("Successfully retrieved {} rooms", rooms.len());
    Ok(Json(RoomsDTO { rooms }))
}

#[instrument(skip(state, current_user), fields(uid = %current_user.0))]
pub async fn get_room(
    State(state): State<Arc<AppState>>,
    Extension(current_user): Extension<AuthenticatedUser>,
    Path(rid): Path<RoomId>,
) -> Result<Json<RoomDTO>, AppError> {
    let details = participant_room(&state, &current_user.0, rid).await?;
    Ok(Json(RoomDTO::from(details)))
}

#[debug_handler]
#[instrument(skip(state, current_user, body), fields(uid = %current_user.0, lid = body.lid))]
pub async fn get_or_create_room(
    State(state): State<Arc<AppState>>,
    Extension(current_user): Extension<AuthenticatedUser>,
    Json(body): Json<CreateRoomDTO>,
) -> Result<(StatusCode, Json<CreatedRoomDTO>), AppError> {
    // 1. Validate the body
    // 2. Resolve the listing, its seller is the seller of the room
    // 3. Check the buyer exists and the caller is one of the two parties
    // 4. Refuse pairs where either side blocked the other
    // 5. Get or create the room: 201 when created, 200 when it already existed
    body.validate()?;

    let listing = state
        .listing
        .read(&body.lid)
        .await?
        .ok_or(ChatError::NotFound("listing"))?;
    let seller = listing.seller_uid;
    let buyer = body.uid;

    if state.user.read(&buyer).await?.is_none() {
        return Err(ChatError::NotFound("user").into());
    }
    if seller == buyer {
        warn!("Seller tried to open a room on their own listing");
        return Err(AppError::bad_request("Cannot open a room on your own listing"));
    }
    if current_user.0 != seller && current_user.0 != buyer {
        warn!("Caller is neither the seller nor the buyer");
        return Err(ChatError::AuthorizationDenied.into());
    }
    if state.user.is_blocked_between(&seller, &buyer).await? {
        info!("Room refused, users blocked");
        return Err(ChatError::Blocked.into());
    }

    let (room, created) = state.room.get_or_create(&seller, &buyer, body.lid).await?;
    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };

    info!(rid = room.rid, created, "Room resolved");
    Ok((status, Json(CreatedRoomDTO { rid: room.rid })))
}

#[instrument(skip(state, current_user), fields(uid = %current_user.0))]
pub async fn get_messages(
    State(state): State<Arc<AppState>>,
    Extension(current_user): Extension<AuthenticatedUser>,
    Path(rid): Path<RoomId>,
) -> Result<Json<MessagesDTO>, AppError> {
    let details = participant_room(&state, &current_user.0, rid).await?;

    let messages: Vec<MessageDTO> = state
        .msg
        .history(rid)
        .await?
        .iter()
        .map(|message| MessageDTO::from_message(message, &details))
        .collect();

    debug!("Returning {} messages", messages.len());
    Ok(Json(MessagesDTO { messages }))
}
