//! Fan-out of fetch units

use std::sync::Arc;
use tokio::task::{JoinError, JoinSet};

use super::task::{FetchTaskContext, run_fetch_task};
use crate::types::{FetchOutcome, InfoHash, RunSummary};

/// The set of fetch units launched for one backlog
///
/// Dropping a `Dispatch` aborts every unit still running.
pub struct Dispatch {
    tasks: JoinSet<(InfoHash, FetchOutcome)>,
    launched: usize,
}

impl Dispatch {
    /// Spawn one independent unit per identifier
    pub(crate) fn launch(context: Arc<FetchTaskContext>, backlog: Vec<InfoHash>) -> Self {
        let mut tasks = JoinSet::new();
        let launched = backlog.len();

        for info_hash in backlog {
            let context = context.clone();
            tasks.spawn(async move {
                let outcome = run_fetch_task(context, info_hash).await;
                (info_hash, outcome)
            });
        }

        tracing::debug!(launched, "Fetch units launched");
        Self { tasks, launched }
    }

    /// Number of units launched
    pub fn launched(&self) -> usize {
        self.launched
    }

    /// Number of units not yet collected
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Wait for every unit, folding outcomes into `summary` as they finish
    ///
    /// Cancel safe: dropping the future keeps whatever was already counted.
    pub async fn collect(&mut self, summary: &mut RunSummary) {
        while let Some(joined) = self.tasks.join_next().await {
            record(joined, summary);
        }
    }

    /// Abort every unit still running and return how many there were
    ///
    /// Units that already finished are counted into `summary` first. Aborted
    /// units release their registrations as they are torn down.
    pub fn abandon(mut self, summary: &mut RunSummary) -> usize {
        while let Some(joined) = self.tasks.try_join_next() {
            record(joined, summary);
        }

        let abandoned = self.tasks.len();
        self.tasks.abort_all();
        abandoned
    }
}

fn record(joined: Result<(InfoHash, FetchOutcome), JoinError>, summary: &mut RunSummary) {
    match joined {
        Ok((_, outcome)) => summary.record(&outcome),
        Err(e) if e.is_panic() => {
            tracing::error!(error = %e, "Fetch unit panicked");
            summary.record(&FetchOutcome::Failed {
                error: "fetch unit panicked".to_string(),
            });
        }
        // Only aborted units end up here
        Err(_) => {}
    }
}
