//! WebSocket Event Handlers - inbound chat frames

use crate::core::{AppState, ChatError};
use crate::dtos::InboundChatFrame;
use crate::entities::RoomId;
use crate::ws::chatmap::Published;
use crate::ws::fanout::notify_absent_participants;
use tracing::{debug, info, instrument, warn};

/// Handles one text frame received on a bound room connection.
///
/// 1. Parse and validate the frame
/// 2. Re-check that the identity still belongs to the room
/// 3. Persist, then broadcast to the room (serialized per room)
/// 4. Notify the participants that are not in the room
///
/// The returned error is meant for the sending connection only.
#[instrument(skip(state, text))]
pub async fn process_message(
    state: &AppState,
    rid: RoomId,
    identity: &str,
    text: &str,
) -> Result<Published, ChatError> {
    let frame = InboundChatFrame::parse(text)?;
    if frame.sender != identity {
        warn!(
            claimed = %frame.sender,
            "Frame sender differs from the authenticated identity, using the latter"
        );
    }

    // the room may have been deleted since the connection was bound
    let room = state.room.authorize_connection(identity, rid).await?;

    let content = frame.message.as_str();
    let published = state
        .chats_online
        .publish(rid, move |sent_at| state.msg.append(rid, identity, content, sent_at))
        .await?;
    info!(
        mid = published.message.mid,
        receivers = published.delivered,
        "Message published"
    );

    let notified = notify_absent_participants(state, &room, &published.message).await;
    debug!(notified, "Fan-out completed");

    Ok(published)
}
