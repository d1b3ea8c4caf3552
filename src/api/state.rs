//! Application state for the API server

use crate::{Config, Scheduler};
use std::sync::Arc;

/// Shared application state accessible to all route handlers
///
/// Cloned for each request; the scheduler handle is itself a bundle of `Arc`s.
#[derive(Clone)]
pub struct AppState {
    /// The scheduler every route operates on
    pub scheduler: Scheduler,

    /// Configuration (read-only)
    pub config: Arc<Config>,
}

impl AppState {
    /// Create a new AppState
    pub fn new(scheduler: Scheduler, config: Arc<Config>) -> Self {
        Self { scheduler, config }
    }
}
