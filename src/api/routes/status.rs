//! Run status

use crate::api::AppState;
use crate::client::ClientStatus;
use crate::types::{FetchState, InfoHash};
use axum::{Json, extract::State, response::IntoResponse};
use serde::Serialize;

/// A unit currently in flight
#[derive(Debug, Serialize)]
pub struct ActiveFetch {
    /// Identifier being fetched
    pub info_hash: InfoHash,
    /// Where the unit is in its lifecycle
    pub state: FetchState,
}

/// Body of `GET /status`
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    /// Units in flight, ordered by identifier
    pub active: Vec<ActiveFetch>,
    /// What the network client reports
    pub client: ClientStatus,
}

/// GET /status - Units in flight and client status
pub async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    let active = state
        .fetcher
        .active_fetches()
        .into_iter()
        .map(|(info_hash, state)| ActiveFetch { info_hash, state })
        .collect();

    Json(StatusResponse {
        active,
        client: state.fetcher.client().status(),
    })
}
