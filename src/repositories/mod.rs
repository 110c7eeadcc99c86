//! Repositories module - database access for every entity
//!
//! Queries are runtime-checked (`sqlx::query_as` + `FromRow`): the crate builds without
//! a live database. The schema lives in `migrations/` and is applied by [`run_migrations`].

pub mod listing;
pub mod message;
pub mod room;
pub mod traits;
pub mod user;

pub use traits::Read;

pub use listing::ListingRepository;
pub use message::MessageRepository;
pub use room::RoomRepository;
pub use user::UserRepository;

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, instrument};

/// How long a writer waits for another connection's write lock
const BUSY_TIMEOUT_SECONDS: u64 = 5;

/// Opens the connection pool. Foreign keys are enforced (room deletion cascades to
/// messages). Connections are never recycled, so `sqlite::memory:` with a single
/// connection keeps its data for the lifetime of the pool.
#[instrument(skip(database_url))]
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
    connect(options, max_connections).await
}

/// Write transactions must start with `BEGIN IMMEDIATE`: a deferred transaction that
/// reads first cannot wait for the write lock and fails with `SQLITE_BUSY`.
async fn connect(options: SqliteConnectOptions, max_connections: u32) -> Result<SqlitePool, sqlx::Error> {
    let options = options
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(BUSY_TIMEOUT_SECONDS));

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;

    info!("Database pool ready");
    Ok(pool)
}

/// Applies the embedded migrations.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use tempfile::TempDir;

    async fn seed(pool: &SqlitePool) {
        run_migrations(pool).await.expect("migrations");
        for script in [
            include_str!("../../fixtures/users.sql"),
            include_str!("../../fixtures/listings.sql"),
            include_str!("../../fixtures/rooms.sql"),
            include_str!("../../fixtures/messages.sql"),
        ] {
            sqlx::raw_sql(script).execute(pool).await.expect("fixture");
        }
    }

    /// Fresh in-memory database with the schema and the `fixtures/` data loaded.
    /// Single connection: statements never overlap.
    pub async fn seeded_pool() -> SqlitePool {
        let pool = create_pool("sqlite::memory:", 1).await.expect("in-memory pool");
        seed(&pool).await;
        pool
    }

    /// Seeded database in a temporary file, shared by `max_connections` connections
    /// that really contend for the write lock. The directory must outlive the pool.
    pub async fn seeded_file_pool(max_connections: u32) -> (TempDir, SqlitePool) {
        let dir = tempfile::tempdir().expect("temp dir");
        let options = SqliteConnectOptions::new()
            .filename(dir.path().join("market.db"))
            .create_if_missing(true);
        let pool = connect(options, max_connections).await.expect("file pool");
        seed(&pool).await;
        (dir, pool)
    }
}
