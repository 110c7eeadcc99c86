//! ListingRepository - read-only listing catalog

use super::Read;
use crate::core::ChatError;
use crate::entities::{Listing, ListingId};
use sqlx::{Error, SqlitePool};
use tracing::{debug, instrument};

pub struct ListingRepository {
    connection_pool: SqlitePool,
}

impl ListingRepository {
    pub fn new(connection_pool: SqlitePool) -> Self {
        Self { connection_pool }
    }

    /// Title used as the room name in notifications.
    pub async fn title_of(&self, id: ListingId) -> Result<String, ChatError> {
        self.read(&id)
            .await?
            .map(|listing| listing.title)
            .ok_or(ChatError::NotFound("listing"))
    }
}

impl Read<Listing, ListingId> for ListingRepository {
    #[instrument(skip(self), fields(listing_id = %id))]
    async fn read(&self, id: &ListingId) -> Result<Option<Listing>, Error> {
        debug!("Looking up listing");
        sqlx::query_as::<_, Listing>("SELECT id, title, seller_uid FROM listings WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.connection_pool)
            .await
    }
}
