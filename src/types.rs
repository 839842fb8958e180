//! Core types and events for info-fetcher

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Length in bytes of a BitTorrent v1 info hash
pub const INFO_HASH_LEN: usize = 20;

/// 20-byte SHA-1 digest naming a torrent's info dictionary
///
/// Equality is byte-exact. The canonical text form is lowercase hex; parsing
/// accepts either case so identifiers stored by other tools still match.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InfoHash(pub [u8; INFO_HASH_LEN]);

impl InfoHash {
    /// Create an InfoHash from raw digest bytes
    pub fn new(bytes: [u8; INFO_HASH_LEN]) -> Self {
        Self(bytes)
    }

    /// Build an InfoHash from a slice, failing unless it is exactly 20 bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self, InfoHashParseError> {
        let array: [u8; INFO_HASH_LEN] = bytes
            .try_into()
            .map_err(|_| InfoHashParseError::Length(bytes.len()))?;
        Ok(Self(array))
    }

    /// Raw digest bytes
    pub fn as_bytes(&self) -> &[u8; INFO_HASH_LEN] {
        &self.0
    }

    /// Canonical lowercase hex encoding
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

/// Error returned when text or bytes do not form a valid info hash
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InfoHashParseError {
    /// Wrong number of bytes or hex characters
    #[error("expected 20 bytes (40 hex characters), got {0}")]
    Length(usize),
    /// Text contained a non-hex character
    #[error("invalid hex: {0}")]
    Hex(String),
}

impl FromStr for InfoHash {
    type Err = InfoHashParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.len() != INFO_HASH_LEN * 2 {
            return Err(InfoHashParseError::Length(s.len()));
        }
        let mut bytes = [0u8; INFO_HASH_LEN];
        hex::decode_to_slice(s, &mut bytes)
            .map_err(|e| InfoHashParseError::Hex(e.to_string()))?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InfoHash({})", self.to_hex())
    }
}

impl Serialize for InfoHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for InfoHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// Stored as canonical hex text in the completed table
impl sqlx::Type<sqlx::Sqlite> for InfoHash {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <String as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <String as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for InfoHash {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode(self.to_hex(), buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for InfoHash {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let text = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(text.parse()?)
    }
}

/// Lifecycle state of a single fetch unit
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchState {
    /// Launched, waiting for a slot in the worker pool
    Pending,
    /// Registered with the network client
    Registered,
    /// Waiting for metadata to arrive
    AwaitingMetadata,
    /// Deadline elapsed before metadata arrived
    TimedOut,
    /// Metadata written to the store
    Persisted,
    /// Fetch or write failed
    Failed,
    /// Network resources released; terminal
    Released,
}

/// Final result of one fetch unit
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FetchOutcome {
    /// Metadata fetched and a new completed record inserted
    Persisted,
    /// Metadata fetched but a completed record already existed
    AlreadyPresent,
    /// No metadata before the deadline
    TimedOut,
    /// Client dropped the torrent or the write failed
    Failed {
        /// Human-readable failure reason
        error: String,
    },
}

impl FetchOutcome {
    /// Whether the identifier ended up with a completed record
    pub fn is_complete(&self) -> bool {
        matches!(self, FetchOutcome::Persisted | FetchOutcome::AlreadyPresent)
    }
}

/// Aggregate counts for one pipeline run
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Units that finished (in any outcome)
    pub finished: usize,
    /// New completed records written
    pub persisted: usize,
    /// Metadata fetched for identifiers that were already recorded
    pub already_present: usize,
    /// Units that hit the deadline
    pub timed_out: usize,
    /// Units that failed otherwise (including panicked tasks)
    pub failed: usize,
}

impl RunSummary {
    /// Fold one unit's outcome into the summary
    pub fn record(&mut self, outcome: &FetchOutcome) {
        self.finished += 1;
        match outcome {
            FetchOutcome::Persisted => self.persisted += 1,
            FetchOutcome::AlreadyPresent => self.already_present += 1,
            FetchOutcome::TimedOut => self.timed_out += 1,
            FetchOutcome::Failed { .. } => self.failed += 1,
        }
    }
}

/// Events emitted by the fetcher
///
/// Consumers subscribe with [`crate::MetadataFetcher::subscribe`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    /// Backlog read from the store
    BacklogResolved {
        /// Number of identifiers needing metadata
        count: usize,
    },
    /// Identifier registered with the network client
    Registered {
        /// Identifier
        info_hash: InfoHash,
    },
    /// Metadata arrived from the swarm
    MetadataReceived {
        /// Identifier
        info_hash: InfoHash,
        /// Metadata length in bytes
        size: usize,
        /// Time from registration to arrival
        elapsed_ms: u64,
    },
    /// Deadline elapsed without metadata
    TimedOut {
        /// Identifier
        info_hash: InfoHash,
    },
    /// Completed record written (or already present)
    Persisted {
        /// Identifier
        info_hash: InfoHash,
        /// False when a row for this identifier already existed
        inserted: bool,
    },
    /// Writing the completed record failed
    PersistFailed {
        /// Identifier
        info_hash: InfoHash,
        /// Error message
        error: String,
    },
    /// Network resources released; the unit is finished
    Released {
        /// Identifier
        info_hash: InfoHash,
        /// How the unit ended
        outcome: FetchOutcome,
    },
    /// Every unit finished
    RunFinished {
        /// Aggregate counts
        summary: RunSummary,
    },
    /// The run was interrupted before every unit finished
    Interrupted {
        /// Units still in flight when the interruption arrived
        abandoned: usize,
    },
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    const UBUNTU: &str = "3f9aac158c7de8dfcab171ea58a17aabdf7fbc93";

    #[test]
    fn parses_either_case_to_the_same_hash() {
        let lower: InfoHash = UBUNTU.parse().unwrap();
        let upper: InfoHash = UBUNTU.to_uppercase().parse().unwrap();
        assert_eq!(lower, upper);
        assert_eq!(upper.to_string(), UBUNTU, "display is canonical lowercase");
    }

    #[test]
    fn rejects_wrong_length_and_bad_digits() {
        assert_eq!(
            "abcd".parse::<InfoHash>(),
            Err(InfoHashParseError::Length(4))
        );
        let bad = format!("zz{}", &UBUNTU[2..]);
        assert!(matches!(
            bad.parse::<InfoHash>(),
            Err(InfoHashParseError::Hex(_))
        ));
    }

    #[test]
    fn from_slice_requires_twenty_bytes() {
        assert!(InfoHash::from_slice(&[0u8; 20]).is_ok());
        assert_eq!(
            InfoHash::from_slice(&[0u8; 19]),
            Err(InfoHashParseError::Length(19))
        );
    }

    #[test]
    fn serializes_as_hex_string() {
        let hash: InfoHash = UBUNTU.parse().unwrap();
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, format!("\"{UBUNTU}\""));
        let back: InfoHash = serde_json::from_str(&json).unwrap();
        assert_eq!(back, hash);
    }

    #[test]
    fn summary_counts_each_outcome() {
        let mut summary = RunSummary::default();
        summary.record(&FetchOutcome::Persisted);
        summary.record(&FetchOutcome::AlreadyPresent);
        summary.record(&FetchOutcome::TimedOut);
        summary.record(&FetchOutcome::Failed {
            error: "disk full".into(),
        });

        assert_eq!(
            summary,
            RunSummary {
                finished: 4,
                persisted: 1,
                already_present: 1,
                timed_out: 1,
                failed: 1,
            }
        );
    }

    #[test]
    fn outcome_completeness() {
        assert!(FetchOutcome::Persisted.is_complete());
        assert!(FetchOutcome::AlreadyPresent.is_complete());
        assert!(!FetchOutcome::TimedOut.is_complete());
    }
}
