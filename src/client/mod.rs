//! Network client capability
//!
//! The fetch pipeline only talks to the swarm through [`TorrentClient`]. The
//! shipped implementation is [`SwarmClient`]; tests substitute their own.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;

use crate::error::FetchError;
use crate::types::InfoHash;

mod swarm;
pub mod tracker;
pub mod wire;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;

pub use swarm::SwarmClient;

/// Metadata bytes shared between the client and every waiting handle
pub type Metadata = Arc<[u8]>;

/// Capabilities of a metadata-fetching network client
///
/// Implementations are shared by every fetch unit and must tolerate
/// concurrent add/drop calls. None of the methods block.
pub trait TorrentClient: Send + Sync {
    /// Start tracking an info hash and return its readiness signal
    ///
    /// Adding a hash that is already tracked returns another handle to the
    /// same torrent.
    fn add_info_hash(&self, info_hash: InfoHash) -> TorrentHandle;

    /// Attach trackers to a tracked info hash; unknown hashes are ignored
    fn add_trackers(&self, info_hash: &InfoHash, trackers: &[String]);

    /// Stop tracking an info hash and free its resources
    ///
    /// Outstanding handles observe [`FetchError::Dropped`] unless metadata
    /// was already published.
    fn drop_info_hash(&self, info_hash: &InfoHash);

    /// Snapshot of what the client is doing
    fn status(&self) -> ClientStatus;
}

/// Readiness signal for one tracked info hash
#[derive(Debug, Clone)]
pub struct TorrentHandle {
    info_hash: InfoHash,
    info: watch::Receiver<Option<Metadata>>,
}

impl TorrentHandle {
    /// Wrap the receiving half of a torrent's metadata slot
    pub fn new(info_hash: InfoHash, info: watch::Receiver<Option<Metadata>>) -> Self {
        Self { info_hash, info }
    }

    /// Info hash this handle belongs to
    pub fn info_hash(&self) -> InfoHash {
        self.info_hash
    }

    /// Metadata if it has already arrived
    pub fn info(&self) -> Option<Metadata> {
        self.info.borrow().clone()
    }

    /// Wait until metadata is available
    ///
    /// Fails with [`FetchError::Dropped`] if the client stops tracking the
    /// torrent first. Callers bound the wait with their own deadline.
    pub async fn got_info(&mut self) -> Result<Metadata, FetchError> {
        let ready = self
            .info
            .wait_for(Option::is_some)
            .await
            .map_err(|_| FetchError::Dropped)?;
        (*ready).clone().ok_or(FetchError::Dropped)
    }
}

/// Client-wide status snapshot
#[derive(Debug, Clone, Serialize)]
pub struct ClientStatus {
    /// Peer id announced to trackers, hex encoded
    pub peer_id: String,
    /// Torrents currently tracked
    pub torrents: Vec<TorrentStatus>,
}

/// Status of one tracked torrent
#[derive(Debug, Clone, Serialize)]
pub struct TorrentStatus {
    /// Info hash
    pub info_hash: InfoHash,
    /// Whether verified metadata has been published
    pub has_metadata: bool,
    /// Trackers attached so far
    pub trackers: usize,
    /// Distinct peers learned from trackers
    pub peers_seen: usize,
    /// Seconds since the torrent was added
    pub age_secs: u64,
}
