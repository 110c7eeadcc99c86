//! MessageRepository - Message Store
//!
//! Appends messages to a room's history and reads it back in a stable order:
//! ascending `sent_at`, ties broken by ascending `mid`.

use crate::core::ChatError;
use crate::entities::{Message, Room, RoomId};
use chrono::{DateTime, Utc};
use sqlx::{Error, SqlitePool};
use tracing::{debug, info, instrument, warn};

pub struct MessageRepository {
    connection_pool: SqlitePool,
}

impl MessageRepository {
    pub fn new(connection_pool: SqlitePool) -> Self {
        Self { connection_pool }
    }

    /// Durably records one message.
    ///
    /// Fails with `RoomNotFound` for an unknown room, `NotParticipant` when the sender
    /// is neither seller nor buyer, `EmptyContent` for blank content. The room check and
    /// the insert share one transaction, which takes the write lock up front.
    #[instrument(skip(self, content), fields(len = content.len()))]
    pub async fn append(
        &self,
        rid: RoomId,
        sender_uid: &str,
        content: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<Message, ChatError> {
        if content.trim().is_empty() {
            return Err(ChatError::EmptyContent);
        }

        let mut tx = self.connection_pool.begin_with("BEGIN IMMEDIATE").await?;

        let room = sqlx::query_as::<_, Room>(
            "SELECT rid, seller_uid, buyer_uid, listing_id FROM rooms WHERE rid = ?",
        )
        .bind(rid)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(ChatError::RoomNotFound)?;

        if !room.is_participant(sender_uid) {
            warn!("Sender is not a participant, message refused");
            return Err(ChatError::NotParticipant);
        }

        let message = sqlx::query_as::<_, Message>(
            r#"
            INSERT INTO messages (rid, sender_uid, content, sent_at)
            VALUES (?, ?, ?, ?)
            RETURNING mid, rid, sender_uid, content, sent_at
            "#,
        )
        .bind(rid)
        .bind(sender_uid)
        .bind(content)
        .bind(sent_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(mid = message.mid, "Message persisted");
        Ok(message)
    }

    /// Full history of a room, oldest first. Unknown rooms have an empty history.
    #[instrument(skip(self))]
    pub async fn history(&self, rid: RoomId) -> Result<Vec<Message>, Error> {
        let messages = sqlx::query_as::<_, Message>(
            r#"
            SELECT mid, rid, sender_uid, content, sent_at
            FROM messages
            WHERE rid = ?
            ORDER BY sent_at ASC, mid ASC
            "#,
        )
        .bind(rid)
        .fetch_all(&self.connection_pool)
        .await?;

        debug!(count = messages.len(), "History loaded");
        Ok(messages)
    }

    /// Latest message of a room, for conversation previews.
    #[instrument(skip(self))]
    pub async fn most_recent(&self, rid: RoomId) -> Result<Option<Message>, Error> {
        sqlx::query_as::<_, Message>(
            r#"
            SELECT mid, rid, sender_uid, content, sent_at
            FROM messages
            WHERE rid = ?
            ORDER BY sent_at DESC, mid DESC
            LIMIT 1
            "#,
        )
        .bind(rid)
        .fetch_optional(&self.connection_pool)
        .await
    }
}
