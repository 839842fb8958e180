//! Error types for info-fetcher
//!
//! Errors fall into two groups:
//! - Fatal errors ([`Error`]) that abort a run before or while reading the backlog
//! - Per-identifier errors ([`FetchError`], [`TrackerError`], [`PeerError`]) that stay
//!   inside a single fetch unit and never affect its siblings

use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

use crate::bencode::BencodeError;

/// Result type alias for info-fetcher operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for info-fetcher
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "fetch.trackers")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// Network client could not be constructed
    #[error("network client error: {0}")]
    Client(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Status server error
    #[error("status server error: {0}")]
    ApiServerError(String),
}

impl Error {
    /// Shorthand for a configuration error tied to a key
    pub fn config(key: &str, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.to_string()),
        }
    }
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// A candidate row does not hold a valid info hash
    #[error("invalid candidate {value:?}: {reason}")]
    InvalidCandidate {
        /// The stored value, hex encoded
        value: String,
        /// Why it was rejected
        reason: String,
    },
}

/// Per-identifier errors raised while waiting for metadata
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Metadata did not arrive before the deadline
    #[error("timed out after {after:?} waiting for metadata")]
    TimedOut {
        /// The deadline that elapsed
        after: Duration,
    },

    /// The client stopped tracking the info hash before metadata arrived
    #[error("network client dropped the torrent before metadata arrived")]
    Dropped,
}

/// Tracker announce errors
#[derive(Debug, Error)]
pub enum TrackerError {
    /// Tracker URL could not be used
    #[error("unsupported tracker url {url}: {reason}")]
    InvalidUrl {
        /// Offending URL
        url: String,
        /// Why it was rejected
        reason: String,
    },

    /// HTTP request failed
    #[error("http announce failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Socket or resolution failure
    #[error("tracker I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Tracker did not answer in time
    #[error("tracker did not respond within {0:?}")]
    Timeout(Duration),

    /// Tracker rejected the announce
    #[error("tracker failure: {0}")]
    Failure(String),

    /// Response could not be understood
    #[error("malformed tracker response: {0}")]
    Malformed(String),

    /// Response body was not valid bencode
    #[error("malformed tracker response: {0}")]
    Bencode(#[from] BencodeError),
}

/// Peer wire errors during the metadata exchange
#[derive(Debug, Error)]
pub enum PeerError {
    /// Socket failure
    #[error("peer {addr} I/O error: {source}")]
    Io {
        /// Remote peer
        addr: SocketAddr,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Connect or session deadline elapsed
    #[error("peer {addr} timed out")]
    Timeout {
        /// Remote peer
        addr: SocketAddr,
    },

    /// Peer violated the protocol
    #[error("peer {addr} protocol error: {reason}")]
    Protocol {
        /// Remote peer
        addr: SocketAddr,
        /// What went wrong
        reason: String,
    },

    /// Peer does not offer the metadata extension
    #[error("peer {addr} does not support metadata exchange")]
    Unsupported {
        /// Remote peer
        addr: SocketAddr,
    },

    /// Peer refused a metadata piece
    #[error("peer {addr} rejected metadata piece {piece}")]
    Rejected {
        /// Remote peer
        addr: SocketAddr,
        /// Piece index
        piece: usize,
    },

    /// Assembled metadata does not hash to the info hash
    #[error("peer {addr} sent metadata that does not match the info hash")]
    HashMismatch {
        /// Remote peer
        addr: SocketAddr,
    },
}
