//! Room entity - a conversation between a seller and a buyer about one listing

use super::{Identity, ListingId, MessageId, RoomId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Room {
    pub rid: RoomId,
    pub seller_uid: Identity,
    pub buyer_uid: Identity,
    pub listing_id: ListingId,
}

impl Room {
    /// True when `identity` is the seller or the buyer of this room.
    pub fn is_participant(&self, identity: &str) -> bool {
        self.seller_uid == identity || self.buyer_uid == identity
    }

    pub fn participants(&self) -> [&Identity; 2] {
        [&self.seller_uid, &self.buyer_uid]
    }
}

/// Room joined with the participants' display names and the listing title.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RoomDetails {
    pub rid: RoomId,
    pub seller_uid: Identity,
    pub buyer_uid: Identity,
    pub seller_name: String,
    pub buyer_name: String,
    pub listing_id: ListingId,
    pub listing_title: String,
}

impl RoomDetails {
    pub fn is_participant(&self, identity: &str) -> bool {
        self.seller_uid == identity || self.buyer_uid == identity
    }

    /// Display name of a participant, falling back to the raw identity.
    pub fn display_name_of<'a>(&'a self, identity: &'a str) -> &'a str {
        if identity == self.seller_uid {
            &self.seller_name
        } else if identity == self.buyer_uid {
            &self.buyer_name
        } else {
            identity
        }
    }
}

/// Conversation-list entry: a room and its most recent message.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RoomSummary {
    pub rid: RoomId,
    pub seller_name: String,
    pub buyer_name: String,
    pub listing_id: ListingId,
    pub listing_title: String,
    pub recent_mid: MessageId,
    pub recent_message: String,
    pub recent_sent_at: DateTime<Utc>,
}
