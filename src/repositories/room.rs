//! RoomRepository - Room Directory persistence
//!
//! Resolves rooms, authorizes participants and creates rooms idempotently. The UNIQUE
//! (seller_uid, buyer_uid, listing_id) constraint is the only guard against duplicate
//! rooms: creation inserts first and falls back to a read on conflict.

use super::Read;
use crate::core::ChatError;
use crate::entities::{ListingId, Room, RoomDetails, RoomId, RoomSummary};
use sqlx::{Error, SqlitePool};
use tracing::{debug, info, instrument, warn};

pub struct RoomRepository {
    connection_pool: SqlitePool,
}

impl RoomRepository {
    pub fn new(connection_pool: SqlitePool) -> Self {
        Self { connection_pool }
    }

    pub async fn resolve(&self, rid: RoomId) -> Result<Room, ChatError> {
        self.read(&rid).await?.ok_or_else(|| {
            debug!("Room does not exist");
            ChatError::RoomNotFound
        })
    }

    /// Allowed iff the room exists and `identity` is its seller or buyer.
    /// The room is returned on success so callers do not read it twice.
    #[instrument(skip(self))]
    pub async fn authorize_connection(&self, identity: &str, rid: RoomId) -> Result<Room, ChatError> {
        let room = self.resolve(rid).await?;

        if !room.is_participant(identity) {
            warn!("Identity is not part of the room");
            return Err(ChatError::AuthorizationDenied);
        }

        Ok(room)
    }

    /// Returns the room for the triple, creating it when missing.
    /// The boolean is `true` when this call created the room.
    #[instrument(skip(self))]
    pub async fn get_or_create(
        &self,
        seller_uid: &str,
        buyer_uid: &str,
        listing_id: ListingId,
    ) -> Result<(Room, bool), ChatError> {
        let inserted = sqlx::query_as::<_, Room>(
            r#"
            INSERT INTO rooms (seller_uid, buyer_uid, listing_id)
            VALUES (?, ?, ?)
            RETURNING rid, seller_uid, buyer_uid, listing_id
            "#,
        )
        .bind(seller_uid)
        .bind(buyer_uid)
        .bind(listing_id)
        .fetch_one(&self.connection_pool)
        .await;

        match inserted {
            Ok(room) => {
                info!(rid = room.rid, "Room created");
                Ok((room, true))
            }
            Err(Error::Database(db_err)) if db_err.is_unique_violation() => {
                debug!("Room already exists, fetching it");
                let room = self
                    .find_by_triple(seller_uid, buyer_uid, listing_id)
                    .await?
                    // deleted between the conflict and the read
                    .ok_or(ChatError::RoomNotFound)?;
                Ok((room, false))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn find_by_triple(
        &self,
        seller_uid: &str,
        buyer_uid: &str,
        listing_id: ListingId,
    ) -> Result<Option<Room>, Error> {
        sqlx::query_as::<_, Room>(
            r#"
            SELECT rid, seller_uid, buyer_uid, listing_id
            FROM rooms
            WHERE seller_uid = ? AND buyer_uid = ? AND listing_id = ?
            "#,
        )
        .bind(seller_uid)
        .bind(buyer_uid)
        .bind(listing_id)
        .fetch_optional(&self.connection_pool)
        .await
    }

    /// Room with display names and listing title.
    #[instrument(skip(self))]
    pub async fn find_details(&self, rid: RoomId) -> Result<Option<RoomDetails>, Error> {
        sqlx::query_as::<_, RoomDetails>(
            r#"
            SELECT
                r.rid,
                r.seller_uid,
                r.buyer_uid,
                s.display_name AS seller_name,
                b.display_name AS buyer_name,
                l.id AS listing_id,
                l.title AS listing_title
            FROM rooms r
            JOIN users s ON s.uid = r.seller_uid
            JOIN users b ON b.uid = r.buyer_uid
            JOIN listings l ON l.id = r.listing_id
            WHERE r.rid = ?
            "#,
        )
        .bind(rid)
        .fetch_optional(&self.connection_pool)
        .await
    }

    /// Rooms of `identity` that have at least one message, most recent activity first.
    #[instrument(skip(self))]
    pub async fn find_summaries_for(&self, identity: &str) -> Result<Vec<RoomSummary>, Error> {
        let summaries = sqlx::query_as::<_, RoomSummary>(
            r#"
            SELECT
                r.rid,
                s.display_name AS seller_name,
                b.display_name AS buyer_name,
                l.id AS listing_id,
                l.title AS listing_title,
                m.mid AS recent_mid,
                m.content AS recent_message,
                m.sent_at AS recent_sent_at
            FROM rooms r
            JOIN users s ON s.uid = r.seller_uid
            JOIN users b ON b.uid = r.buyer_uid
            JOIN listings l ON l.id = r.listing_id
            JOIN messages m ON m.mid = (
                SELECT mid FROM messages
                WHERE rid = r.rid
                ORDER BY sent_at DESC, mid DESC
                LIMIT 1
            )
            WHERE r.seller_uid = ? OR r.buyer_uid = ?
            ORDER BY m.sent_at DESC, m.mid DESC
            "#,
        )
        .bind(identity)
        .bind(identity)
        .fetch_all(&self.connection_pool)
        .await?;

        debug!(count = summaries.len(), "Room summaries loaded");
        Ok(summaries)
    }

    /// Deletes every room shared by `a` and `b`, whatever their roles.
    /// Messages go with their room (ON DELETE CASCADE).
    #[instrument(skip(self))]
    pub async fn delete_between(&self, a: &str, b: &str) -> Result<Vec<RoomId>, Error> {
        let removed: Vec<(RoomId,)> = sqlx::query_as(
            r#"
            DELETE FROM rooms
            WHERE (seller_uid = ? AND buyer_uid = ?)
               OR (seller_uid = ? AND buyer_uid = ?)
            RETURNING rid
            "#,
        )
        .bind(a)
        .bind(b)
        .bind(b)
        .bind(a)
        .fetch_all(&self.connection_pool)
        .await?;

        info!(count = removed.len(), "Rooms deleted");
        Ok(removed.into_iter().map(|(rid,)| rid).collect())
    }
}

impl Read<Room, RoomId> for RoomRepository {
    #[instrument(skip(self), fields(rid = %id))]
    async fn read(&self, id: &RoomId) -> Result<Option<Room>, Error> {
        debug!("Resolving room");
        sqlx::query_as::<_, Room>(
            "SELECT rid, seller_uid, buyer_uid, listing_id FROM rooms WHERE rid = ?",
        )
        .bind(id)
        .fetch_optional(&self.connection_pool)
        .await
    }
}
