//! A single fetch unit

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, broadcast};

use super::{ActiveFetches, MetadataFacade};
use crate::db::Database;
use crate::error::FetchError;
use crate::types::{Event, FetchOutcome, FetchState, InfoHash};

/// Everything a unit needs, shared by every unit of one dispatch
pub(crate) struct FetchTaskContext {
    pub(crate) facade: MetadataFacade,
    pub(crate) db: Arc<Database>,
    pub(crate) event_tx: broadcast::Sender<Event>,
    pub(crate) active: ActiveFetches,
    /// Worker slots when concurrency is bounded
    pub(crate) permits: Option<Arc<Semaphore>>,
    /// Per-identifier metadata deadline, measured from registration
    pub(crate) deadline: Duration,
}

impl FetchTaskContext {
    fn emit(&self, event: Event) {
        self.event_tx.send(event).ok();
    }
}

/// Drive one identifier from `Pending` to `Released`
///
/// Never fails: every error is folded into the returned outcome so siblings
/// are unaffected. The registration is released before returning, and also
/// if the task is aborted or panics.
pub(crate) async fn run_fetch_task(
    ctx: Arc<FetchTaskContext>,
    info_hash: InfoHash,
) -> FetchOutcome {
    let active = ctx.active.track(info_hash);

    let _permit = match &ctx.permits {
        Some(permits) => match permits.clone().acquire_owned().await {
            Ok(permit) => Some(permit),
            Err(e) => {
                tracing::error!(info_hash = %info_hash, error = %e, "Worker pool closed");
                return FetchOutcome::Failed {
                    error: e.to_string(),
                };
            }
        },
        None => None,
    };

    let mut registration = ctx.facade.register(info_hash);
    active.set(FetchState::Registered);
    ctx.emit(Event::Registered { info_hash });

    active.set(FetchState::AwaitingMetadata);
    let outcome = match registration.await_metadata(ctx.deadline).await {
        Ok(metadata) => {
            let elapsed_ms = registration.elapsed().as_millis() as u64;
            tracing::info!(
                info_hash = %info_hash,
                size = metadata.len(),
                elapsed_ms,
                "Got metadata"
            );
            ctx.emit(Event::MetadataReceived {
                info_hash,
                size: metadata.len(),
                elapsed_ms,
            });

            match ctx.db.insert_completed(&info_hash, &metadata).await {
                Ok(inserted) => {
                    if !inserted {
                        tracing::debug!(
                            info_hash = %info_hash,
                            "Completed record already present"
                        );
                    }
                    active.set(FetchState::Persisted);
                    ctx.emit(Event::Persisted {
                        info_hash,
                        inserted,
                    });
                    if inserted {
                        FetchOutcome::Persisted
                    } else {
                        FetchOutcome::AlreadyPresent
                    }
                }
                Err(e) => {
                    tracing::error!(
                        info_hash = %info_hash,
                        error = %e,
                        "Failed to persist metadata"
                    );
                    active.set(FetchState::Failed);
                    ctx.emit(Event::PersistFailed {
                        info_hash,
                        error: e.to_string(),
                    });
                    FetchOutcome::Failed {
                        error: e.to_string(),
                    }
                }
            }
        }
        Err(FetchError::TimedOut { after }) => {
            tracing::warn!(
                info_hash = %info_hash,
                after_secs = after.as_secs_f64(),
                "Timed out waiting for metadata"
            );
            active.set(FetchState::TimedOut);
            ctx.emit(Event::TimedOut { info_hash });
            FetchOutcome::TimedOut
        }
        Err(e) => {
            tracing::warn!(info_hash = %info_hash, error = %e, "Metadata fetch failed");
            active.set(FetchState::Failed);
            FetchOutcome::Failed {
                error: e.to_string(),
            }
        }
    };

    registration.release();
    active.set(FetchState::Released);
    ctx.emit(Event::Released {
        info_hash,
        outcome: outcome.clone(),
    });

    outcome
}
