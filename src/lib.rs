//! # info-fetcher
//!
//! Bulk BitTorrent metadata fetcher backed by SQLite.
//!
//! ## Design
//!
//! - **Store-driven** - The backlog is whatever sits in `candidates` without a
//!   row in `completed`; nothing else decides what gets fetched
//! - **One unit per identifier** - Each fetch is independent, bounded by a
//!   deadline, and releases its client registration on every exit path
//! - **Idempotent** - Re-running never duplicates or re-fetches a record
//! - **Interruptible** - Cancellation returns promptly and keeps finished work
//! - **Event-driven** - Consumers subscribe to events, no polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use info_fetcher::{Config, MetadataFetcher};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let fetcher = MetadataFetcher::new(Config::default()).await?;
//!
//!     let mut events = fetcher.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let cancel = CancellationToken::new();
//!     let outcome = fetcher.run(cancel).await?;
//!     println!("{:?}", outcome.summary());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Status endpoint
pub mod api;
/// Bencode codec
pub mod bencode;
/// Network client capability and the shipped swarm client
pub mod client;
/// Configuration types
pub mod config;
/// Database persistence layer
pub mod db;
/// Error types
pub mod error;
/// Fetch pipeline
pub mod fetcher;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use client::{ClientStatus, SwarmClient, TorrentClient, TorrentHandle};
pub use config::Config;
pub use db::Database;
pub use error::{DatabaseError, Error, FetchError, Result};
pub use fetcher::{MetadataFetcher, RunOutcome};
pub use types::{Event, FetchOutcome, FetchState, InfoHash, RunSummary};

use tokio_util::sync::CancellationToken;

/// Cancel `token` when a termination signal arrives
///
/// Spawns a background task, so the caller keeps running until it observes
/// the cancellation itself.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use info_fetcher::{Config, MetadataFetcher, cancel_on_signal};
/// use tokio_util::sync::CancellationToken;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let fetcher = MetadataFetcher::new(Config::default()).await?;
///     let cancel = CancellationToken::new();
///     cancel_on_signal(cancel.clone());
///
///     let outcome = fetcher.run(cancel).await?;
///     std::process::exit(if outcome.is_interrupted() { 1 } else { 0 });
/// }
/// ```
pub fn cancel_on_signal(token: CancellationToken) {
    tokio::spawn(async move {
        tokio::select! {
            _ = wait_for_signal() => token.cancel(),
            _ = token.cancelled() => {}
        }
    });
}

/// Wait for SIGTERM or SIGINT (Ctrl+C elsewhere)
#[cfg(unix)]
pub async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

/// Wait for Ctrl+C
#[cfg(not(unix))]
pub async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
