//! WebSocket frames
//!
//! Every frame is an explicit record: inbound frames are validated at the connection
//! boundary and rejected with a [`WsErrorFrame`] instead of failing on a missing key.

use crate::core::ChatError;
use crate::dtos::format_time;
use crate::entities::Message;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Client -> server on `ws/chat/{roomId}/`.
#[derive(Serialize, Deserialize, Debug, Clone, Validate)]
pub struct InboundChatFrame {
    #[validate(length(min = 1, max = 5000, message = "Message content must be between 1 and 5000 characters"))]
    pub message: String,

    #[validate(length(min = 1, max = 255))]
    pub sender: String,
}

impl InboundChatFrame {
    /// Parses and validates a text frame.
    pub fn parse(text: &str) -> Result<Self, ChatError> {
        let frame: Self =
            serde_json::from_str(text).map_err(|e| ChatError::InvalidFrame(e.to_string()))?;
        frame
            .validate()
            .map_err(|e| ChatError::InvalidFrame(e.to_string()))?;
        Ok(frame)
    }
}

/// Server -> client on `ws/chat/{roomId}/`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ChatBroadcastFrame {
    pub message: String,
    pub sender: String,
    #[serde(rename = "timeSent")]
    pub time_sent: String,
}

impl From<&Message> for ChatBroadcastFrame {
    fn from(value: &Message) -> Self {
        Self {
            message: value.content.clone(),
            sender: value.sender_uid.clone(),
            time_sent: format_time(&value.sent_at),
        }
    }
}

/// Server -> client on `ws/global/`. `room` is the listing title.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NotificationFrame {
    pub sender: String,
    pub message: String,
    pub room: String,
}

/// Sent only to the connection whose frame failed.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WsErrorFrame {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl From<&ChatError> for WsErrorFrame {
    fn from(err: &ChatError) -> Self {
        let details = match err {
            // store internals stay on the server
            ChatError::Persistence(_) => None,
            other => Some(other.to_string()),
        };
        Self {
            error: err.code().to_string(),
            details,
        }
    }
}
