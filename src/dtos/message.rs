//! Message DTOs - history entries returned by `GET /get_messages/{id}/`

use crate::dtos::format_time;
use crate::entities::{Message, RoomDetails};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MessageDTO {
    /// Display name of the sender
    pub sender: String,
    pub content: String,
    #[serde(rename = "timeSent")]
    pub time_sent: String,
}

impl MessageDTO {
    pub fn from_message(message: &Message, room: &RoomDetails) -> Self {
        Self {
            sender: room.display_name_of(&message.sender_uid).to_string(),
            content: message.content.clone(),
            time_sent: format_time(&message.sent_at),
        }
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct MessagesDTO {
    pub messages: Vec<MessageDTO>,
}
