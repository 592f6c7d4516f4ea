//! Call Correlator
//!
//! Matches response frames to the calls that are waiting for them. Each
//! waiting caller holds a [`PendingResponse`]; the receive loop resolves
//! it by id without ever blocking on the caller.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::error::RpcError;

/// Outcome delivered to a waiting caller
pub type CallResult = Result<Value, RpcError>;

/// An outstanding call waiting for its response
struct PendingCall {
    method: String,
    created_at: Instant,
    slot: oneshot::Sender<CallResult>,
}

#[derive(Default)]
struct CallTable {
    calls: HashMap<u64, PendingCall>,
    closed: bool,
}

/// Per-connection table of outstanding calls
pub struct CallCorrelator {
    next_id: AtomicU64,
    table: Mutex<CallTable>,
}

impl Default for CallCorrelator {
    fn default() -> Self {
        Self::new()
    }
}

impl CallCorrelator {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            table: Mutex::new(CallTable::default()),
        }
    }

    /// Allocate the next request id (starts at 1, never reused)
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Register a pending call. Fails once the connection has closed.
    pub fn register(&self, id: u64, method: &str) -> Result<PendingResponse, RpcError> {
        let (tx, rx) = oneshot::channel();
        let mut table = self.table.lock();
        if table.closed {
            return Err(RpcError::ConnectionClosed);
        }
        match table.calls.entry(id) {
            Entry::Occupied(_) => Err(RpcError::Protocol(format!("call id {} is already pending", id))),
            Entry::Vacant(slot) => {
                slot.insert(PendingCall {
                    method: method.to_string(),
                    created_at: Instant::now(),
                    slot: tx,
                });
                Ok(PendingResponse { id, rx })
            }
        }
    }

    /// Deliver a successful result. Returns false for unknown ids.
    pub fn resolve(&self, id: u64, result: Value) -> bool {
        self.complete(id, Ok(result))
    }

    /// Deliver a failure. Returns false for unknown ids.
    pub fn fail(&self, id: u64, error: RpcError) -> bool {
        self.complete(id, Err(error))
    }

    fn complete(&self, id: u64, outcome: CallResult) -> bool {
        let Some(call) = self.table.lock().calls.remove(&id) else {
            warn!("Dropping response for unknown call id {}", id);
            return false;
        };

        debug!(
            "Call {} ({}) completed in {:?}",
            id,
            call.method,
            call.created_at.elapsed()
        );
        // Receiver gone means the caller stopped waiting
        if call.slot.send(outcome).is_err() {
            debug!("Caller for call {} no longer waiting", id);
        }
        true
    }

    /// Remove a call without resolving it (the request was never sent)
    pub fn forget(&self, id: u64) {
        self.table.lock().calls.remove(&id);
    }

    /// Fail every pending call with [`RpcError::ConnectionClosed`] and refuse new ones.
    ///
    /// Returns the number of calls that were failed.
    pub fn fail_all(&self) -> usize {
        let drained: Vec<(u64, PendingCall)> = {
            let mut table = self.table.lock();
            table.closed = true;
            table.calls.drain().collect()
        };

        let count = drained.len();
        for (id, call) in drained {
            debug!("Failing call {} ({}): connection closed", id, call.method);
            let _ = call.slot.send(Err(RpcError::ConnectionClosed));
        }
        count
    }

    pub fn pending_len(&self) -> usize {
        self.table.lock().calls.len()
    }

    pub fn is_closed(&self) -> bool {
        self.table.lock().closed
    }

    /// Age of the oldest outstanding call
    pub fn oldest_pending(&self) -> Option<Duration> {
        self.table
            .lock()
            .calls
            .values()
            .map(|call| call.created_at.elapsed())
            .max()
    }
}

/// Awaitable side of a registered call
#[derive(Debug)]
pub struct PendingResponse {
    id: u64,
    rx: oneshot::Receiver<CallResult>,
}

impl PendingResponse {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the receive loop to resolve or fail this call
    pub async fn wait(self) -> CallResult {
        self.rx.await.unwrap_or(Err(RpcError::ConnectionClosed))
    }
}
