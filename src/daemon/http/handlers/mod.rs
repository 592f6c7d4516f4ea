//! HTTP API Request Handlers
//!
//! Handlers that map HTTP requests to RequestHandler operations.

mod index;
mod search;
mod system;

use std::sync::Arc;

use crate::daemon::handler::RequestHandler;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub handler: Arc<RequestHandler>,
    /// Neighbors returned when a search omits `k`
    pub default_k: usize,
}

pub use index::{add_vectors, trigger_update};
pub use search::search;
pub use system::{health, prometheus_metrics, stats};
