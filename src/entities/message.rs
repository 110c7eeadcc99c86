//! Message entity - one immutable chat utterance

use super::{Identity, MessageId, RoomId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Message {
    pub mid: MessageId,
    pub rid: RoomId,
    pub sender_uid: Identity,
    pub content: String,
    // assigned by the room channel while holding the room lock, never by the client
    pub sent_at: DateTime<Utc>,
}
