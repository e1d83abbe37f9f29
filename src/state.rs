//! Shared state read by the status API.

use crate::cache::StaleTracker;
use crate::model::Source;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

/// Sources with a live subscription, as of the last reconcile.
pub type Sources = Arc<RwLock<Vec<Source>>>;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub sources: Sources,
    pub tracker: Arc<StaleTracker>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(tracker: Arc<StaleTracker>) -> Self {
        Self {
            sources: Arc::new(RwLock::new(Vec::new())),
            tracker,
            started_at: Instant::now(),
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(Arc::new(StaleTracker::new()))
    }
}
