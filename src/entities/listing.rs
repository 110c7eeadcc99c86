//! Listing entity - read-only view of the listing catalog

use super::{Identity, ListingId};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, sqlx::FromRow)]
pub struct Listing {
    pub id: ListingId,
    pub title: String,
    pub seller_uid: Identity,
}
