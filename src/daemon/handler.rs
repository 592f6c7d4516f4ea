//! Request Handler
//!
//! Dispatches incoming requests to the index manager and returns responses.
//! The same handler serves framed RPC calls (through [`Dispatch`]) and the
//! HTTP API.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, error, info};

use crate::rpc::{Dispatch, ResponseError};
use crate::types::{EnqueueOutcome, VectorBatch};

use super::index_manager::{IndexManager, TriggerOutcome};
use super::metrics::DaemonMetrics;
use super::protocol::*;

/// Request handler shared by every connection
pub struct RequestHandler {
    index_manager: Arc<IndexManager>,
    start_time: Instant,
}

impl RequestHandler {
    /// Create a new request handler
    pub fn new(index_manager: Arc<IndexManager>) -> Self {
        Self {
            index_manager,
            start_time: Instant::now(),
        }
    }

    pub fn index_manager(&self) -> &Arc<IndexManager> {
        &self.index_manager
    }

    pub fn metrics(&self) -> &Arc<DaemonMetrics> {
        self.index_manager.metrics()
    }

    /// Handle a typed request
    pub async fn handle(&self, request: Request) -> Result<Response, ResponseError> {
        debug!("Handling request: {}", request.method());

        match request {
            Request::Search { queries, k } => self.handle_search(queries, k).await,
            Request::AddVectors { vectors } => self.handle_add_vectors(vectors),
            Request::TriggerUpdate => Ok(self.handle_trigger_update()),
            Request::Stats => Ok(self.handle_stats()),
            Request::Ping => Ok(Response::Pong),
        }
    }

    // ============ Query Handlers ============

    async fn handle_search(&self, queries: Vec<Vec<f32>>, k: usize) -> Result<Response, ResponseError> {
        self.index_manager.check_k(k)?;
        let queries = self.to_batch(queries)?;

        // Searching a large corpus is CPU-bound; keep it off the async workers
        let manager = self.index_manager.clone();
        let outcome = tokio::task::spawn_blocking(move || manager.search(&queries, k))
            .await
            .map_err(|e| {
                error!("Search task failed: {}", e);
                ResponseError::internal(format!("Search task failed: {}", e))
            })?;

        Ok(Response::SearchResults(outcome?))
    }

    // ============ Write Handlers ============

    fn handle_add_vectors(&self, vectors: Vec<Vec<f32>>) -> Result<Response, ResponseError> {
        let batch = self.to_batch(vectors)?;

        let status = match self.index_manager.enqueue(batch)? {
            EnqueueOutcome::NoChange => UpdateStatus::new(UpdateState::NoChange, "No vectors in request."),
            EnqueueOutcome::Queued { added, queue_len } => UpdateStatus::new(
                UpdateState::Queued,
                format!(
                    "Queued {} vectors for the next index update ({} pending).",
                    added, queue_len
                ),
            ),
        };
        Ok(Response::Update(status))
    }

    fn handle_trigger_update(&self) -> Response {
        let message = match self.index_manager.trigger_rebuild() {
            TriggerOutcome::Started => {
                info!("Index update triggered");
                "Index update started in the background."
            }
            TriggerOutcome::Coalesced => "Index update already in progress.",
        };
        Response::Update(UpdateStatus::new(UpdateState::Processing, message))
    }

    // ============ Management Handlers ============

    fn handle_stats(&self) -> Response {
        Response::Stats(DaemonStats {
            index: self.index_manager.stats(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        })
    }

    /// Convert wire rows to a batch, rejecting the whole batch on any bad row
    fn to_batch(&self, rows: Vec<Vec<f32>>) -> Result<VectorBatch, ResponseError> {
        VectorBatch::from_rows(self.index_manager.dimensions(), rows)
            .map_err(|e| ResponseError::invalid_params(e.to_string()))
    }
}

#[async_trait]
impl Dispatch for RequestHandler {
    async fn dispatch(&self, method: &str, params: Vec<Value>) -> Result<Value, ResponseError> {
        self.metrics().rpc_requests_total.inc();
        let request = Request::from_call(method, params)?;
        self.handle(request).await?.into_value()
    }

    async fn notify(&self, method: &str, params: Vec<Value>) {
        // Notifications run the same methods; the result is discarded
        match Request::from_call(method, params) {
            Ok(request) => {
                if let Err(e) = self.handle(request).await {
                    debug!("Notification {} failed: {}", method, e);
                }
            }
            Err(e) => debug!("Ignoring notification {}: {}", method, e),
        }
    }
}
