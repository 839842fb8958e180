//! Database layer for info-fetcher
//!
//! Handles SQLite persistence for the candidate backlog and completed metadata.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`] — Database lifecycle, schema migrations
//! - [`backlog`] — Candidate ingestion and backlog resolution
//! - [`completed`] — Idempotent metadata persistence and lookups

use crate::types::InfoHash;
use sqlx::{FromRow, sqlite::SqlitePool};

mod backlog;
mod completed;
mod migrations;

/// Completed metadata record from database
#[derive(Debug, Clone, FromRow)]
pub struct CompletedRecord {
    /// Identifier, canonical lowercase hex
    pub infohash: InfoHash,
    /// Raw bencoded info dictionary
    pub metadata: Vec<u8>,
    /// Unix timestamp when the record was written
    pub fetched_at: i64,
}

/// Database handle for info-fetcher
///
/// Reads go straight to the pool. Writes are serialized through `write_lock`
/// so concurrent fetch units never race each other on SQLite's single writer;
/// other processes are held off by SQLite's own locking and the busy timeout.
pub struct Database {
    pool: SqlitePool,
    write_lock: tokio::sync::Mutex<()>,
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
