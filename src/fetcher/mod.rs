//! Bulk metadata acquisition pipeline
//!
//! The `MetadataFetcher` ties the pieces together:
//! - [`facade`] - Registration with the network client, released on drop
//! - [`task`] - One fetch unit: register, wait with a deadline, persist, release
//! - [`dispatch`] - Fan-out of one unit per backlog identifier
//! - [`shutdown`] - Race between "all units finished" and interruption

pub mod dispatch;
pub mod facade;
pub mod shutdown;
mod task;


pub use dispatch::Dispatch;
pub use facade::{MetadataFacade, Registration};
pub use shutdown::{RunOutcome, run_until_cancelled};

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;

use crate::client::{SwarmClient, TorrentClient};
use crate::config::Config;
use crate::db::Database;
use crate::error::Result;
use crate::types::{Event, FetchState, InfoHash, RunSummary};

use task::FetchTaskContext;

/// Fetch units currently alive and the state each one is in
///
/// Entries are removed by [`ActiveGuard`] when a unit ends for any reason,
/// including abort, so the map is a plain synchronous mutex.
#[derive(Clone, Default)]
pub(crate) struct ActiveFetches {
    inner: Arc<Mutex<HashMap<InfoHash, FetchState>>>,
}

impl ActiveFetches {
    fn lock(&self) -> MutexGuard<'_, HashMap<InfoHash, FetchState>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start tracking a unit in the `Pending` state
    pub(crate) fn track(&self, info_hash: InfoHash) -> ActiveGuard {
        self.lock().insert(info_hash, FetchState::Pending);
        ActiveGuard {
            fetches: self.clone(),
            info_hash,
        }
    }

    fn snapshot(&self) -> Vec<(InfoHash, FetchState)> {
        let mut entries: Vec<_> = self.lock().iter().map(|(k, v)| (*k, *v)).collect();
        entries.sort_by_key(|(info_hash, _)| *info_hash);
        entries
    }
}

/// Keeps a unit's entry in [`ActiveFetches`] alive
pub(crate) struct ActiveGuard {
    fetches: ActiveFetches,
    info_hash: InfoHash,
}

impl ActiveGuard {
    pub(crate) fn set(&self, state: FetchState) {
        self.fetches.lock().insert(self.info_hash, state);
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.fetches.lock().remove(&self.info_hash);
    }
}

/// Main fetcher instance (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct MetadataFetcher {
    /// Record store (wrapped in Arc for sharing across fetch units)
    pub db: Arc<Database>,
    /// Shared network client
    pub(crate) client: Arc<dyn TorrentClient>,
    /// Configuration
    pub(crate) config: Arc<Config>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: tokio::sync::broadcast::Sender<Event>,
    /// Units currently in flight
    pub(crate) active: ActiveFetches,
}

impl MetadataFetcher {
    /// Create a fetcher backed by the shipped [`SwarmClient`]
    ///
    /// Validates the config, opens (and migrates) the database and builds
    /// the client. Any of these failing is fatal; nothing has been fetched yet.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let db = Database::new(&config.persistence.database_path).await?;
        let client = SwarmClient::new(&config.client)?;
        Self::with_client(config, Arc::new(db), Arc::new(client))
    }

    /// Create a fetcher from an open database and any client implementation
    ///
    /// Fails if `config` does not pass [`Config::validate`].
    pub fn with_client(
        config: Config,
        db: Arc<Database>,
        client: Arc<dyn TorrentClient>,
    ) -> Result<Self> {
        config.validate()?;
        let (event_tx, _rx) = tokio::sync::broadcast::channel(1000);
        Ok(Self {
            db,
            client,
            config: Arc::new(config),
            event_tx,
            active: ActiveFetches::default(),
        })
    }

    /// Subscribe to fetch events
    ///
    /// Each subscriber receives every event; one that falls more than 1000
    /// events behind gets `RecvError::Lagged`.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Get the current configuration
    pub fn get_config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// The shared network client
    pub fn client(&self) -> Arc<dyn TorrentClient> {
        Arc::clone(&self.client)
    }

    /// Units in flight and their states, ordered by info hash
    pub fn active_fetches(&self) -> Vec<(InfoHash, FetchState)> {
        self.active.snapshot()
    }

    /// Read the backlog: candidates that have no completed record yet
    pub async fn resolve_backlog(&self) -> Result<Vec<InfoHash>> {
        let backlog = self.db.resolve_backlog().await?;
        tracing::info!(count = backlog.len(), "Backlog resolved");
        self.emit_event(Event::BacklogResolved {
            count: backlog.len(),
        });
        Ok(backlog)
    }

    /// Launch one fetch unit per identifier
    ///
    /// Must be called from within a Tokio runtime. Units start immediately;
    /// with `fetch.max_concurrent_fetches` set, the surplus waits in
    /// `Pending` for a slot.
    pub fn dispatch(&self, backlog: Vec<InfoHash>) -> Dispatch {
        let permits = self
            .config
            .fetch
            .max_concurrent_fetches
            .map(|limit| Arc::new(tokio::sync::Semaphore::new(limit)));

        let context = Arc::new(FetchTaskContext {
            facade: MetadataFacade::new(self.client.clone(), &self.config.fetch.trackers),
            db: self.db.clone(),
            event_tx: self.event_tx.clone(),
            active: self.active.clone(),
            permits,
            deadline: self.config.fetch.metadata_timeout,
        });

        Dispatch::launch(context, backlog)
    }

    /// Run the whole pipeline once
    ///
    /// Resolves the backlog, fetches every identifier in it and returns when
    /// all units have finished or `cancel` fires, whichever comes first.
    /// Only backlog resolution can fail; per-identifier failures are counted
    /// in the summary.
    pub async fn run(&self, cancel: CancellationToken) -> Result<RunOutcome> {
        let backlog = self.resolve_backlog().await?;

        if backlog.is_empty() {
            tracing::info!("Nothing to fetch");
            let summary = RunSummary::default();
            self.emit_event(Event::RunFinished { summary });
            return Ok(RunOutcome::Completed(summary));
        }

        let dispatch = self.dispatch(backlog);
        let outcome = run_until_cancelled(dispatch, &cancel).await;

        match &outcome {
            RunOutcome::Completed(summary) => {
                tracing::info!(
                    finished = summary.finished,
                    persisted = summary.persisted,
                    already_present = summary.already_present,
                    timed_out = summary.timed_out,
                    failed = summary.failed,
                    "Run finished"
                );
                self.emit_event(Event::RunFinished { summary: *summary });
            }
            RunOutcome::Interrupted { abandoned, summary } => {
                tracing::warn!(
                    abandoned = *abandoned,
                    finished = summary.finished,
                    "Run interrupted"
                );
                self.emit_event(Event::Interrupted {
                    abandoned: *abandoned,
                });
            }
        }

        Ok(outcome)
    }

    /// Emit an event to all subscribers
    ///
    /// Events with no subscribers are dropped.
    pub(crate) fn emit_event(&self, event: Event) {
        self.event_tx.send(event).ok();
    }
}
