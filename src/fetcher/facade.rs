//! Network client facade
//!
//! A [`Registration`] is the only way a fetch unit touches the client. It is
//! created by [`MetadataFacade::register`] and stops tracking the identifier
//! when dropped, so every exit path (return, timeout, panic, abort) releases
//! the client's resources exactly once.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::client::{Metadata, TorrentClient, TorrentHandle};
use crate::error::FetchError;
use crate::types::InfoHash;

/// Registers identifiers with the shared client and attaches trackers
#[derive(Clone)]
pub struct MetadataFacade {
    client: Arc<dyn TorrentClient>,
    trackers: Arc<[String]>,
}

impl MetadataFacade {
    /// Wrap a client; `trackers` are attached to every registration
    pub fn new(client: Arc<dyn TorrentClient>, trackers: &[String]) -> Self {
        Self {
            client,
            trackers: trackers.into(),
        }
    }

    /// Begin tracking an identifier; never blocks
    pub fn register(&self, info_hash: InfoHash) -> Registration {
        let handle = self.client.add_info_hash(info_hash);
        if !self.trackers.is_empty() {
            self.client.add_trackers(&info_hash, &self.trackers);
        }
        tracing::debug!(info_hash = %info_hash, trackers = self.trackers.len(), "Registered");

        Registration {
            client: self.client.clone(),
            handle,
            registered_at: Instant::now(),
        }
    }
}

/// A tracked identifier; dropping it releases the client's resources
#[must_use = "dropping a Registration releases it immediately"]
pub struct Registration {
    client: Arc<dyn TorrentClient>,
    handle: TorrentHandle,
    registered_at: Instant,
}

impl Registration {
    /// Identifier being tracked
    pub fn info_hash(&self) -> InfoHash {
        self.handle.info_hash()
    }

    /// Time since registration
    pub fn elapsed(&self) -> Duration {
        self.registered_at.elapsed()
    }

    /// Wait for metadata, giving up once `deadline` has passed since registration
    pub async fn await_metadata(&mut self, deadline: Duration) -> Result<Metadata, FetchError> {
        let remaining = deadline.saturating_sub(self.elapsed());
        match tokio::time::timeout(remaining, self.handle.got_info()).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::TimedOut { after: deadline }),
        }
    }

    /// Release explicitly; same as dropping
    pub fn release(self) {}
}

impl Drop for Registration {
    fn drop(&mut self) {
        let info_hash = self.handle.info_hash();
        self.client.drop_info_hash(&info_hash);
        tracing::debug!(info_hash = %info_hash, "Released");
    }
}
