//! Room DTOs - Data Transfer Objects for rooms

use crate::dtos::format_time;
use crate::entities::{Identity, ListingId, RoomDetails, RoomId, RoomSummary};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Body of `POST /get_or_create_room/`: `uid` is the buyer, the seller is the
/// owner of listing `lid`.
#[derive(Serialize, Deserialize, Debug, Clone, Validate)]
pub struct CreateRoomDTO {
    pub lid: ListingId,

    #[validate(length(min = 1, max = 255, message = "uid must be between 1 and 255 characters"))]
    pub uid: Identity,
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct CreatedRoomDTO {
    pub rid: RoomId,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct RoomDTO {
    pub rid: RoomId,
    pub seller: String,
    pub buyer: String,
    #[serde(rename = "listingName")]
    pub listing_name: String,
    #[serde(rename = "listingId")]
    pub listing_id: ListingId,
}

impl From<RoomDetails> for RoomDTO {
    fn from(value: RoomDetails) -> Self {
        Self {
            rid: value.rid,
            seller: value.seller_name,
            buyer: value.buyer_name,
            listing_name: value.listing_title,
            listing_id: value.listing_id,
        }
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct RoomSummaryDTO {
    pub rid: RoomId,
    pub seller: String,
    pub buyer: String,
    #[serde(rename = "listingName")]
    pub listing_name: String,
    #[serde(rename = "listingId")]
    pub listing_id: ListingId,
    #[serde(rename = "recentMessage")]
    pub recent_message: String,
    #[serde(rename = "timeSent")]
    pub time_sent: String,
}

impl From<RoomSummary> for RoomSummaryDTO {
    fn from(value: RoomSummary) -> Self {
        Self {
            rid: value.rid,
            seller: value.seller_name,
            buyer: value.buyer_name,
            listing_name: value.listing_title,
            listing_id: value.listing_id,
            recent_message: value.recent_message,
            time_sent: format_time(&value.recent_sent_at),
        }
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct RoomsDTO {
    pub rooms: Vec<RoomSummaryDTO>,
}
