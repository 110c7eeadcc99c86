//! Entities module - Domain entities
//!
//! Every entity maps one table of the relational store. Users and listings are owned
//! by the surrounding CRUD code: the chat core only reads them.

pub mod listing;
pub mod message;
pub mod room;
pub mod user;

pub use listing::Listing;
pub use message::Message;
pub use room::{Room, RoomDetails, RoomSummary};
pub use user::User;

/// Opaque, stable user identifier (the `uid` issued by the identity provider).
pub type Identity = String;

// integer keys assigned by the store
pub type RoomId = i64;
pub type MessageId = i64;
pub type ListingId = i64;
