//! SQLite connection pool for the local library copy.

use exn::ResultExt;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use std::path::Path;
use std::time::Duration;
use tracing::instrument;

use crate::error::{ErrorKind, Result};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
// The store serializes its writers, so one connection is enough for batches.
// The others serve cursor lookups while a batch is being written.
const MAX_CONNECTIONS: u32 = 4;
// A cursor write may have to wait for a large batch transaction to commit.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// The SQLite database behind [`EntityStore`](crate::EntityStore) and
/// [`SyncCursors`](crate::SyncCursors).
///
/// The database only ever holds a copy of the remote library, so durability
/// is traded for write speed: a crash can lose the last committed batch,
/// which the next sync fetches again.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    async fn open(options: SqliteConnectOptions, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Opens (creating if needed) the library database at `path` and brings
    /// its schema up to date.
    #[instrument(level = "debug", skip_all, fields(path = %path.as_ref().display()))]
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            // Cursor lookups read while a batch is being written.
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(BUSY_TIMEOUT);
        Self::open(options, MAX_CONNECTIONS).await
    }

    /// Opens a private in-memory database. Not gated on `cfg(test)` so other
    /// crates can use it in their tests.
    pub async fn connect_in_memory() -> Result<Self> {
        // Every connection to `:memory:` gets its own database, so the pool
        // must never open a second one.
        let options = SqliteConnectOptions::new().filename(":memory:");
        Self::open(options, 1).await
    }

    async fn migrate(&self) -> Result<()> {
        MIGRATOR.run(&self.pool).await.or_raise(|| ErrorKind::Migration)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Closes every connection. The database must not be used afterwards;
    /// queries then fail with [`ErrorKind::Database`].
    pub async fn close(&self) {
        // Refreshes the statistics the planner uses for the partition index.
        _ = sqlx::query("PRAGMA optimize").execute(&self.pool).await;
        self.pool.close().await;
    }
}
