//! Completion versus interruption

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::Dispatch;
use crate::types::RunSummary;

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every unit finished
    Completed(RunSummary),
    /// Cancellation arrived first
    Interrupted {
        /// Units still running when the run was interrupted
        abandoned: usize,
        /// Units that had already finished
        summary: RunSummary,
    },
}

impl RunOutcome {
    /// Counts for the units that finished
    pub fn summary(&self) -> RunSummary {
        match self {
            RunOutcome::Completed(summary) | RunOutcome::Interrupted { summary, .. } => *summary,
        }
    }

    /// Whether the run was cut short
    pub fn is_interrupted(&self) -> bool {
        matches!(self, RunOutcome::Interrupted { .. })
    }
}

/// Wait for every unit in `dispatch`, or for `cancel`, whichever comes first
///
/// On cancellation the remaining units are aborted and this returns without
/// waiting for their deadlines. Results already persisted stay persisted.
pub async fn run_until_cancelled(
    mut dispatch: Dispatch,
    cancel: &CancellationToken,
) -> RunOutcome {
    let mut summary = RunSummary::default();

    let interrupted = tokio::select! {
        biased;
        _ = cancel.cancelled() => true,
        _ = dispatch.collect(&mut summary) => false,
    };

    if interrupted {
        let abandoned = dispatch.abandon(&mut summary);
        RunOutcome::Interrupted { abandoned, summary }
    } else {
        RunOutcome::Completed(summary)
    }
}
