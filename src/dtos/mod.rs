//! DTOs module - Data Transfer Objects
//!
//! Shapes exchanged with clients. They keep the wire format (camelCase keys,
//! `YYYY-MM-DD HH:MM:SS` timestamps) separate from the entities.

pub mod message;
pub mod room;
pub mod ws_event;

pub use message::{MessageDTO, MessagesDTO};
pub use room::{CreateRoomDTO, CreatedRoomDTO, RoomDTO, RoomSummaryDTO, RoomsDTO};
pub use ws_event::{ChatBroadcastFrame, InboundChatFrame, NotificationFrame, WsErrorFrame};

use chrono::{DateTime, Utc};

/// Wire format of every timestamp sent to clients.
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn format_time(time: &DateTime<Utc>) -> String {
    time.format(TIME_FORMAT).to_string()
}
