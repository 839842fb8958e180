//! Tracker-driven swarm client
//!
//! Each added info hash gets one background task that announces to its
//! trackers, asks newly discovered peers for metadata and publishes the first
//! copy that verifies. Dropping the info hash cancels the task.

use futures::stream::{self, StreamExt};
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use super::tracker::{Announce, AnnounceRequest, tracker_for_url};
use super::wire::{self, WireLimits};
use super::{ClientStatus, Metadata, TorrentClient, TorrentHandle, TorrentStatus};
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::types::InfoHash;

/// Azureus-style prefix identifying this client to peers
const PEER_ID_PREFIX: &[u8; 8] = b"-IF0100-";

/// State shared by every torrent task
struct Session {
    config: ClientConfig,
    http: reqwest::Client,
    peer_id: [u8; 20],
}

/// Counters reported through [`TorrentClient::status`]
#[derive(Default)]
struct TorrentStats {
    trackers: AtomicUsize,
    peers_seen: AtomicUsize,
}

struct Torrent {
    info: watch::Receiver<Option<Metadata>>,
    trackers: mpsc::UnboundedSender<String>,
    stats: Arc<TorrentStats>,
    cancel: CancellationToken,
    added_at: Instant,
}

/// The shipped [`TorrentClient`]: tracker discovery plus `ut_metadata`
///
/// Must be used from within a Tokio runtime; adding an info hash spawns a task.
pub struct SwarmClient {
    session: Arc<Session>,
    torrents: Mutex<HashMap<InfoHash, Torrent>>,
}

impl SwarmClient {
    /// Build the client: HTTP client for trackers and a random peer id
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("info-fetcher/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Client(format!("failed to build HTTP client: {}", e)))?;

        let mut peer_id = [0u8; 20];
        peer_id[..8].copy_from_slice(PEER_ID_PREFIX);
        rand::thread_rng().fill(&mut peer_id[8..]);

        tracing::info!(
            peer_id = %String::from_utf8_lossy(&peer_id[..8]),
            port = config.listen_port,
            "Swarm client ready"
        );

        Ok(Self {
            session: Arc::new(Session {
                config: config.clone(),
                http,
                peer_id,
            }),
            torrents: Mutex::new(HashMap::new()),
        })
    }

    /// Peer id announced to trackers and peers
    pub fn peer_id(&self) -> [u8; 20] {
        self.session.peer_id
    }

    fn torrents(&self) -> MutexGuard<'_, HashMap<InfoHash, Torrent>> {
        // The map is never left half-updated, so a poisoned lock is still usable
        self.torrents.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TorrentClient for SwarmClient {
    fn add_info_hash(&self, info_hash: InfoHash) -> TorrentHandle {
        let mut torrents = self.torrents();
        if let Some(existing) = torrents.get(&info_hash) {
            return TorrentHandle::new(info_hash, existing.info.clone());
        }

        let (info_tx, info_rx) = watch::channel(None);
        let (trackers_tx, trackers_rx) = mpsc::unbounded_channel();
        let stats = Arc::new(TorrentStats::default());
        let cancel = CancellationToken::new();

        tokio::spawn(drive_torrent(
            self.session.clone(),
            info_hash,
            info_tx,
            trackers_rx,
            stats.clone(),
            cancel.clone(),
        ));

        torrents.insert(
            info_hash,
            Torrent {
                info: info_rx.clone(),
                trackers: trackers_tx,
                stats,
                cancel,
                added_at: Instant::now(),
            },
        );

        tracing::debug!(info_hash = %info_hash, "Torrent added");
        TorrentHandle::new(info_hash, info_rx)
    }

    fn add_trackers(&self, info_hash: &InfoHash, trackers: &[String]) {
        let torrents = self.torrents();
        let Some(torrent) = torrents.get(info_hash) else {
            tracing::warn!(info_hash = %info_hash, "Trackers added to unknown torrent");
            return;
        };
        for url in trackers {
            // The task only exits once cancelled, and then nobody cares
            let _ = torrent.trackers.send(url.clone());
        }
    }

    fn drop_info_hash(&self, info_hash: &InfoHash) {
        if let Some(torrent) = self.torrents().remove(info_hash) {
            torrent.cancel.cancel();
            tracing::debug!(info_hash = %info_hash, "Torrent dropped");
        }
    }

    fn status(&self) -> ClientStatus {
        let mut torrents: Vec<TorrentStatus> = self
            .torrents()
            .iter()
            .map(|(info_hash, torrent)| TorrentStatus {
                info_hash: *info_hash,
                has_metadata: torrent.info.borrow().is_some(),
                trackers: torrent.stats.trackers.load(Ordering::Relaxed),
                peers_seen: torrent.stats.peers_seen.load(Ordering::Relaxed),
                age_secs: torrent.added_at.elapsed().as_secs(),
            })
            .collect();
        torrents.sort_by_key(|t| t.info_hash);

        ClientStatus {
            peer_id: hex::encode(self.session.peer_id),
            torrents,
        }
    }
}

impl Drop for SwarmClient {
    fn drop(&mut self) {
        for torrent in self.torrents().values() {
            torrent.cancel.cancel();
        }
    }
}

/// Background task for one torrent; returns once metadata is published or
/// the torrent is dropped
async fn drive_torrent(
    session: Arc<Session>,
    info_hash: InfoHash,
    info_tx: watch::Sender<Option<Metadata>>,
    mut new_trackers: mpsc::UnboundedReceiver<String>,
    stats: Arc<TorrentStats>,
    cancel: CancellationToken,
) {
    let mut trackers: Vec<Box<dyn Announce>> = Vec::new();
    let mut seen: HashSet<SocketAddr> = HashSet::new();

    loop {
        while let Ok(url) = new_trackers.try_recv() {
            attach_tracker(&session, &mut trackers, &url, info_hash);
        }
        stats.trackers.store(trackers.len(), Ordering::Relaxed);

        let peers = tokio::select! {
            _ = cancel.cancelled() => return,
            peers = announce_all(&session, &trackers, info_hash) => peers,
        };

        let fresh: Vec<SocketAddr> = peers.into_iter().filter(|p| seen.insert(*p)).collect();
        stats.peers_seen.store(seen.len(), Ordering::Relaxed);

        if !fresh.is_empty() {
            let found = tokio::select! {
                _ = cancel.cancelled() => return,
                found = first_metadata(&session, info_hash, fresh) => found,
            };
            if let Some(metadata) = found {
                tracing::debug!(
                    info_hash = %info_hash,
                    size = metadata.len(),
                    "Metadata verified"
                );
                info_tx.send_replace(Some(Metadata::from(metadata)));
                return;
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(session.config.reannounce_interval) => {}
            url = new_trackers.recv() => match url {
                Some(url) => attach_tracker(&session, &mut trackers, &url, info_hash),
                // Sender lives in the client's map; gone means dropped
                None => return,
            },
        }
    }
}

fn attach_tracker(
    session: &Session,
    trackers: &mut Vec<Box<dyn Announce>>,
    url: &str,
    info_hash: InfoHash,
) {
    if trackers.iter().any(|t| t.url() == url) {
        return;
    }
    match tracker_for_url(url, &session.http, session.config.tracker_timeout) {
        Ok(tracker) => trackers.push(tracker),
        Err(e) => {
            tracing::warn!(info_hash = %info_hash, tracker = url, error = %e, "Ignoring tracker");
        }
    }
}

/// Announce to every tracker in parallel and merge their peers
async fn announce_all(
    session: &Session,
    trackers: &[Box<dyn Announce>],
    info_hash: InfoHash,
) -> Vec<SocketAddr> {
    let request = AnnounceRequest {
        info_hash,
        peer_id: session.peer_id,
        port: session.config.listen_port,
    };

    let results =
        futures::future::join_all(trackers.iter().map(|tracker| tracker.announce(&request))).await;

    let mut peers = Vec::new();
    for (tracker, result) in trackers.iter().zip(results) {
        match result {
            Ok(found) => {
                tracing::debug!(
                    info_hash = %info_hash,
                    tracker = tracker.url(),
                    peers = found.len(),
                    "Announce succeeded"
                );
                peers.extend(found);
            }
            Err(e) => {
                tracing::debug!(
                    info_hash = %info_hash,
                    tracker = tracker.url(),
                    error = %e,
                    "Announce failed"
                );
            }
        }
    }
    peers
}

/// Ask peers for metadata, at most `max_peer_connections` at a time, and
/// return the first verified copy
async fn first_metadata(
    session: &Session,
    info_hash: InfoHash,
    peers: Vec<SocketAddr>,
) -> Option<Vec<u8>> {
    let limits = WireLimits {
        connect_timeout: session.config.connect_timeout,
        session_timeout: session.config.peer_timeout,
        max_metadata_size: session.config.max_metadata_size,
    };
    let peer_id = session.peer_id;

    let mut attempts = stream::iter(peers)
        .map(|addr| wire::fetch_metadata(addr, info_hash, peer_id, limits))
        .buffer_unordered(session.config.max_peer_connections.max(1));

    while let Some(result) = attempts.next().await {
        match result {
            Ok(metadata) => return Some(metadata),
            Err(e) => tracing::debug!(info_hash = %info_hash, error = %e, "Peer failed"),
        }
    }
    None
}
