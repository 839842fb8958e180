//! Status endpoint
//!
//! A small read-only HTTP surface for watching a run: liveness plus a
//! snapshot of the units in flight and the network client.

use crate::{MetadataFetcher, Result};
use axum::{Router, routing::get};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

pub mod routes;
pub mod state;

pub use state::AppState;

/// Create the status router
///
/// # Routes
///
/// - `GET /health` - Health check
/// - `GET /status` - Units in flight and client status
pub fn create_router(fetcher: Arc<MetadataFetcher>) -> Router {
    let state = AppState::new(fetcher);

    Router::new()
        .route("/health", get(routes::health_check))
        .route("/status", get(routes::get_status))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Serve the status endpoint until `shutdown` is cancelled
///
/// Binding failures are returned immediately; once listening, the server
/// drains in-flight requests and returns after cancellation.
pub async fn start_status_server(
    fetcher: Arc<MetadataFetcher>,
    bind_address: SocketAddr,
    shutdown: CancellationToken,
) -> Result<()> {
    let listener = TcpListener::bind(bind_address)
        .await
        .map_err(crate::error::Error::Io)?;

    serve_status(fetcher, listener, shutdown).await
}

/// Serve the status endpoint on an already bound listener
pub async fn serve_status(
    fetcher: Arc<MetadataFetcher>,
    listener: TcpListener,
    shutdown: CancellationToken,
) -> Result<()> {
    let address = listener.local_addr().map_err(crate::error::Error::Io)?;
    tracing::info!(address = %address, "Status endpoint listening");

    let app = create_router(fetcher);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| crate::error::Error::ApiServerError(e.to_string()))?;

    tracing::info!("Status endpoint stopped");
    Ok(())
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
