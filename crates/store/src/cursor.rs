//! Persisted sync cursors.
//!
//! A sync cursor records when the last fully successful fetch of a library
//! started, so the next sync only has to ask for what changed since then.

use crate::Database;
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use kura_model::models::MediaKind;
use sqlx::SqlitePool;
use time::UtcDateTime;

/// Read/write access to the `sync_cursors` table, one cursor per
/// `(owner, media kind)` library.
#[derive(Debug, Clone)]
pub struct SyncCursors {
    pool: SqlitePool,
}
impl From<&Database> for SyncCursors {
    fn from(db: &Database) -> Self {
        Self { pool: db.pool().clone() }
    }
}
impl SyncCursors {
    /// When the last complete sync of this library started, if there was one.
    pub async fn get(&self, owner_id: i64, media_kind: MediaKind) -> Result<Option<UtcDateTime>> {
        let at: Option<i64> = sqlx::query_scalar(include_str!("../queries/get_cursor.sql"))
            .bind(owner_id)
            .bind(media_kind.as_str())
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        at.map(|at| UtcDateTime::from_unix_timestamp(at).or_raise(|| ErrorKind::InvalidData("last fetched at")))
            .transpose()
    }

    /// Moves the cursor of a library to `at` (sub-second precision is dropped).
    pub async fn advance(&self, owner_id: i64, media_kind: MediaKind, at: UtcDateTime) -> Result<()> {
        sqlx::query(include_str!("../queries/advance_cursor.sql"))
            .bind(owner_id)
            .bind(media_kind.as_str())
            .bind(at.unix_timestamp())
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    /// Forgets the cursor of a library, so the next sync fetches everything.
    ///
    /// Returns `false` if there was no cursor to forget.
    pub async fn reset(&self, owner_id: i64, media_kind: MediaKind) -> Result<bool> {
        let result = sqlx::query(include_str!("../queries/reset_cursor.sql"))
            .bind(owner_id)
            .bind(media_kind.as_str())
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(result.rows_affected() > 0)
    }
}
