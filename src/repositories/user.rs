//! UserRepository - read-only user directory plus the block list

use super::Read;
use crate::entities::User;
use sqlx::{Error, SqlitePool};
use tracing::{debug, info, instrument};

pub struct UserRepository {
    connection_pool: SqlitePool,
}

impl UserRepository {
    pub fn new(connection_pool: SqlitePool) -> Self {
        Self { connection_pool }
    }

    /// Records that `blocker_uid` blocked `blocked_uid`. Blocking twice is a no-op.
    #[instrument(skip(self))]
    pub async fn block(&self, blocker_uid: &str, blocked_uid: &str) -> Result<(), Error> {
        sqlx::query(
            "INSERT INTO blocked_users (blocker_uid, blocked_uid) VALUES (?, ?) ON CONFLICT DO NOTHING",
        )
        .bind(blocker_uid)
        .bind(blocked_uid)
        .execute(&self.connection_pool)
        .await?;

        info!("Block recorded");
        Ok(())
    }

    /// True when either user has blocked the other.
    #[instrument(skip(self))]
    pub async fn is_blocked_between(&self, a: &str, b: &str) -> Result<bool, Error> {
        let (blocked,): (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM blocked_users
                WHERE (blocker_uid = ? AND blocked_uid = ?)
                   OR (blocker_uid = ? AND blocked_uid = ?)
            )
            "#,
        )
        .bind(a)
        .bind(b)
        .bind(b)
        .bind(a)
        .fetch_one(&self.connection_pool)
        .await?;

        Ok(blocked)
    }
}

impl Read<User, str> for UserRepository {
    #[instrument(skip(self), fields(uid = %id))]
    async fn read(&self, id: &str) -> Result<Option<User>, Error> {
        debug!("Looking up user");
        sqlx::query_as::<_, User>("SELECT uid, email, display_name FROM users WHERE uid = ?")
            .bind(id)
            .fetch_optional(&self.connection_pool)
            .await
    }
}
