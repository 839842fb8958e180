//! Application state for the status endpoint

use crate::MetadataFetcher;
use std::sync::Arc;

/// Shared state handed to every handler (cheap Arc clone per request)
#[derive(Clone)]
pub struct AppState {
    /// The fetcher being observed
    pub fetcher: Arc<MetadataFetcher>,
}

impl AppState {
    /// Create a new AppState
    pub fn new(fetcher: Arc<MetadataFetcher>) -> Self {
        Self { fetcher }
    }
}
