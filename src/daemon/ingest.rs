//! Ingestion Queue
//!
//! Vectors submitted via `add_vectors` wait here until the next rebuild
//! drains them. The queue has its own lock, independent of the active
//! index, so enqueueing never waits on a search or a rebuild.

use std::mem;

use parking_lot::Mutex;
use tracing::debug;

use super::index_manager::IndexError;
use crate::types::{DimensionMismatch, EnqueueOutcome, VectorBatch};

/// Thread-safe accumulator of vectors pending indexing
pub struct IngestQueue {
    dimensions: usize,
    capacity: usize,
    pending: Mutex<VectorBatch>,
}

impl IngestQueue {
    /// Create a queue for `dimensions`-wide vectors holding at most `capacity` vectors
    pub fn new(dimensions: usize, capacity: usize) -> Self {
        Self {
            dimensions,
            capacity,
            pending: Mutex::new(VectorBatch::empty(dimensions)),
        }
    }

    /// Append a batch.
    ///
    /// Empty batches report [`EnqueueOutcome::NoChange`]. A batch that would
    /// push the queue past capacity is rejected whole.
    pub fn enqueue(&self, batch: VectorBatch) -> Result<EnqueueOutcome, IndexError> {
        if batch.is_empty() {
            return Ok(EnqueueOutcome::NoChange);
        }
        if batch.dimensions() != self.dimensions {
            return Err(IndexError::DimensionMismatch(DimensionMismatch {
                position: 0,
                expected: self.dimensions,
                got: batch.dimensions(),
            }));
        }

        let added = batch.len();
        let mut pending = self.pending.lock();
        if pending.len() + added > self.capacity {
            return Err(IndexError::QueueFull {
                pending: pending.len(),
                incoming: added,
                limit: self.capacity,
            });
        }

        pending.extend(batch);
        let queue_len = pending.len();
        debug!("Queued {} vectors ({} pending)", added, queue_len);
        Ok(EnqueueOutcome::Queued { added, queue_len })
    }

    /// Atomically take everything queued so far
    pub fn drain(&self) -> VectorBatch {
        let mut pending = self.pending.lock();
        mem::replace(&mut *pending, VectorBatch::empty(self.dimensions))
    }

    /// Put a drained batch back at the front, ahead of anything queued since.
    /// Capacity is not enforced: these vectors were already accepted once.
    pub fn requeue(&self, batch: VectorBatch) {
        if batch.is_empty() {
            return;
        }
        let count = batch.len();
        let mut pending = self.pending.lock();
        pending.prepend(batch);
        debug!("Requeued {} vectors ({} pending)", count, pending.len());
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
