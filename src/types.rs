//! Core types for vindex

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Index id used to pad results when the corpus holds fewer than `k` vectors
pub const MISSING_ID: i64 = -1;

/// Distance reported alongside [`MISSING_ID`]
pub const MISSING_DISTANCE: f32 = f32::MAX;

/// A vector whose length does not match the batch dimension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("vector {position} has dimension {got}, expected {expected}")]
pub struct DimensionMismatch {
    pub position: usize,
    pub expected: usize,
    pub got: usize,
}

/// An ordered batch of fixed-dimension vectors, stored row-major
#[derive(Debug, Clone, PartialEq)]
pub struct VectorBatch {
    dimensions: usize,
    data: Vec<f32>,
}

impl VectorBatch {
    /// Create an empty batch of the given dimension
    pub fn empty(dimensions: usize) -> Self {
        Self {
            dimensions,
            data: Vec::new(),
        }
    }

    /// Build a batch from rows, rejecting the whole batch if any row has the wrong length
    pub fn from_rows(dimensions: usize, rows: Vec<Vec<f32>>) -> Result<Self, DimensionMismatch> {
        let mut data = Vec::with_capacity(rows.len() * dimensions);
        for (position, row) in rows.into_iter().enumerate() {
            if row.len() != dimensions {
                return Err(DimensionMismatch {
                    position,
                    expected: dimensions,
                    got: row.len(),
                });
            }
            data.extend_from_slice(&row);
        }
        Ok(Self { dimensions, data })
    }

    /// Build a batch from an already flattened buffer
    pub fn from_flat(dimensions: usize, data: Vec<f32>) -> Result<Self, DimensionMismatch> {
        if dimensions == 0 || data.len() % dimensions != 0 {
            return Err(DimensionMismatch {
                position: data.len() / dimensions.max(1),
                expected: dimensions,
                got: data.len() % dimensions.max(1),
            });
        }
        Ok(Self { dimensions, data })
    }

    /// Uniformly random vectors in `[0, 1)`, reproducible from `seed`
    pub fn random(dimensions: usize, count: usize, seed: u64) -> Self {
        use rand::{Rng, SeedableRng};

        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        let data = (0..count * dimensions).map(|_| rng.gen::<f32>()).collect();
        Self { dimensions, data }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Number of vectors in the batch
    pub fn len(&self) -> usize {
        if self.dimensions == 0 {
            0
        } else {
            self.data.len() / self.dimensions
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get a single vector by position
    pub fn row(&self, index: usize) -> Option<&[f32]> {
        let start = index.checked_mul(self.dimensions)?;
        self.data.get(start..start + self.dimensions)
    }

    /// Iterate over vectors in order
    pub fn rows(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks_exact(self.dimensions.max(1))
    }

    /// The flattened row-major buffer
    pub fn as_flat(&self) -> &[f32] {
        &self.data
    }

    /// Copy the batch back into nested rows (wire representation)
    pub fn to_rows(&self) -> Vec<Vec<f32>> {
        self.rows().map(<[f32]>::to_vec).collect()
    }

    /// A new batch holding `self` followed by `other`
    pub fn concat(&self, other: &VectorBatch) -> Result<VectorBatch, DimensionMismatch> {
        if !other.is_empty() && other.dimensions != self.dimensions {
            return Err(DimensionMismatch {
                position: 0,
                expected: self.dimensions,
                got: other.dimensions,
            });
        }
        let mut data = Vec::with_capacity(self.data.len() + other.data.len());
        data.extend_from_slice(&self.data);
        data.extend_from_slice(&other.data);
        Ok(VectorBatch {
            dimensions: self.dimensions,
            data,
        })
    }

    /// Append `other` in place (dimensions must already match)
    pub(crate) fn extend(&mut self, other: VectorBatch) {
        debug_assert!(other.is_empty() || other.dimensions == self.dimensions);
        self.data.extend(other.data);
    }

    /// Prepend `other` in place (dimensions must already match)
    pub(crate) fn prepend(&mut self, mut other: VectorBatch) {
        debug_assert!(other.is_empty() || other.dimensions == self.dimensions);
        other.data.extend(self.data.drain(..));
        self.data = other.data;
    }
}

/// Nearest neighbors for a batch of queries, one row per query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResults {
    /// Distances, ascending within each row
    pub distances: Vec<Vec<f32>>,
    /// Corpus positions matching `distances`
    pub indices: Vec<Vec<i64>>,
}

impl SearchResults {
    pub fn with_capacity(queries: usize) -> Self {
        Self {
            distances: Vec::with_capacity(queries),
            indices: Vec::with_capacity(queries),
        }
    }

    /// Append one query's neighbors, padding up to `k`
    pub fn push_row(&mut self, mut neighbors: Vec<(f32, i64)>, k: usize) {
        neighbors.truncate(k);
        neighbors.resize(k, (MISSING_DISTANCE, MISSING_ID));
        let (distances, indices) = neighbors.into_iter().unzip();
        self.distances.push(distances);
        self.indices.push(indices);
    }

    /// Number of query rows
    pub fn len(&self) -> usize {
        self.distances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.distances.is_empty()
    }

    /// Split into per-query `(distances, indices)` pairs
    pub fn into_rows(self) -> Vec<QueryResult> {
        self.distances
            .into_iter()
            .zip(self.indices)
            .map(|(distances, indices)| QueryResult { distances, indices })
            .collect()
    }
}

/// Neighbors for a single query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub distances: Vec<f32>,
    pub indices: Vec<i64>,
}

/// Result of submitting a batch to the ingestion queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Zero-length submission, nothing changed
    NoChange,
    /// Batch appended; carries the queue length afterwards
    Queued { added: usize, queue_len: usize },
}

/// Observable state of the index lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManagerState {
    /// No index has been built yet
    Empty,
    /// An index is installed and serving
    Active,
    /// A rebuild is running; the previous index (if any) keeps serving
    Rebuilding,
}
