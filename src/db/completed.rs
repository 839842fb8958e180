//! Completed metadata persistence.

use crate::error::DatabaseError;
use crate::types::InfoHash;
use crate::{Error, Result};

use super::{CompletedRecord, Database};

impl Database {
    /// Record fetched metadata for an identifier unless a record already exists
    ///
    /// Returns `true` if a row was inserted and `false` if one was already
    /// present (under any hex case). The existing row is never overwritten.
    pub async fn insert_completed(&self, info_hash: &InfoHash, metadata: &[u8]) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();
        let _guard = self.write_lock.lock().await;
        let result = sqlx::query(
            r#"
            INSERT INTO completed (infohash, metadata, fetched_at)
            VALUES (?, ?, ?)
            ON CONFLICT(infohash) DO NOTHING
            "#,
        )
        .bind(info_hash)
        .bind(metadata)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to insert completed record: {}",
                e
            )))
        })?;

        Ok(result.rows_affected() == 1)
    }

    /// Get the completed record for an identifier
    pub async fn get_completed(&self, info_hash: &InfoHash) -> Result<Option<CompletedRecord>> {
        let record = sqlx::query_as::<_, CompletedRecord>(
            r#"
            SELECT lower(infohash) AS infohash, metadata, fetched_at
            FROM completed
            WHERE lower(infohash) = ?
            "#,
        )
        .bind(info_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get completed record: {}",
                e
            )))
        })?;

        Ok(record)
    }

    /// List every identifier with a completed record, in insertion order
    pub async fn list_completed(&self) -> Result<Vec<InfoHash>> {
        let hashes: Vec<InfoHash> =
            sqlx::query_scalar("SELECT lower(infohash) FROM completed ORDER BY rowid")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to list completed records: {}",
                        e
                    )))
                })?;

        Ok(hashes)
    }

    /// Count completed records
    pub async fn count_completed(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM completed")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to count completed records: {}",
                    e
                )))
            })?;

        Ok(count)
    }
}
