//! Candidate ingestion and backlog resolution.

use crate::error::DatabaseError;
use crate::types::InfoHash;
use crate::{Error, Result};

use super::Database;

impl Database {
    /// Resolve the backlog: candidates with no completed record
    ///
    /// Candidates may be stored as 20-byte blobs or as hex text of either case;
    /// both sides are folded to lowercase hex before comparing. The result is
    /// deduplicated and ordered by first appearance in `candidates`.
    ///
    /// Any row that is not a valid info hash fails the whole call: a partial
    /// backlog would silently skip work.
    pub async fn resolve_backlog(&self) -> Result<Vec<InfoHash>> {
        let rows: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT c.hex
            FROM (
                SELECT
                    CASE WHEN typeof(infohash) = 'blob'
                        THEN lower(hex(infohash))
                        ELSE lower(trim(infohash))
                    END AS hex,
                    rowid AS seq
                FROM candidates
                WHERE infohash IS NOT NULL
            ) AS c
            WHERE c.hex NOT IN (SELECT lower(infohash) FROM completed)
            GROUP BY c.hex
            ORDER BY MIN(c.seq)
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to resolve backlog: {}",
                e
            )))
        })?;

        rows.into_iter()
            .map(|hex| {
                hex.parse::<InfoHash>().map_err(|e| {
                    Error::Database(DatabaseError::InvalidCandidate {
                        value: hex.clone(),
                        reason: e.to_string(),
                    })
                })
            })
            .collect()
    }

    /// Add identifiers to the candidates table as 20-byte blobs
    ///
    /// Duplicates are harmless; the backlog is deduplicated on read.
    pub async fn insert_candidates(&self, info_hashes: &[InfoHash]) -> Result<u64> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to begin transaction: {}",
                e
            )))
        })?;

        let mut inserted = 0;
        for info_hash in info_hashes {
            let result = sqlx::query("INSERT INTO candidates (infohash) VALUES (?)")
                .bind(info_hash.as_bytes().as_slice())
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to insert candidate: {}",
                        e
                    )))
                })?;
            inserted += result.rows_affected();
        }

        tx.commit().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to commit candidates: {}",
                e
            )))
        })?;

        Ok(inserted)
    }
}
