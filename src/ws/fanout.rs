//! Notification fan-out
//!
//! After a message is broadcast in a room, every participant without an open room
//! connection on it receives a notification on their global connections.

use crate::core::AppState;
use crate::dtos::NotificationFrame;
use crate::entities::{Message, Room};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Returns the number of global connections reached. Failures are logged and never
/// reach the sender of the message.
#[instrument(skip(state, room, message), fields(rid = room.rid, mid = message.mid))]
pub async fn notify_absent_participants(state: &AppState, room: &Room, message: &Message) -> usize {
    let [seller, buyer] = room.participants();
    let mut absent = Vec::with_capacity(2);
    for participant in [seller, buyer] {
        if !state.presence.is_present(room.rid, participant) && !absent.contains(&participant) {
            absent.push(participant);
        }
    }

    if absent.is_empty() {
        debug!("Every participant is present, no notification");
        return 0;
    }

    let title = match state.listing.title_of(room.listing_id).await {
        Ok(title) => title,
        Err(e) => {
            warn!("Failed to resolve listing title, notifications skipped: {}", e);
            return 0;
        }
    };

    let frame = Arc::new(NotificationFrame {
        sender: message.sender_uid.clone(),
        message: message.content.clone(),
        room: title,
    });

    absent
        .into_iter()
        .map(|participant| state.users_online.notify(participant, frame.clone()))
        .sum()
}
