//! Application state shared across all route handlers.

use std::sync::Arc;
use std::time::Instant;

use triage_vector::ClassificationService;

/// Shared application state.
///
/// The classifier is built once at startup and never mutated, so handlers
/// share it without locking.
#[derive(Clone)]
pub struct AppState {
    pub classifier: Arc<ClassificationService>,
    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    pub fn new(classifier: ClassificationService) -> Self {
        Self::from_shared(Arc::new(classifier))
    }

    pub fn from_shared(classifier: Arc<ClassificationService>) -> Self {
        Self {
            classifier,
            start_time: Instant::now(),
        }
    }
}
