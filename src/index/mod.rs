//! Vector indexes
//!
//! The lifecycle manager treats an index as an opaque, immutable snapshot:
//! - [`IndexBuilder`] constructs a brand-new index from the existing corpus
//!   plus a freshly drained batch, without touching either input
//! - [`SearchIndex`] answers k-nearest-neighbor queries
//! - [`IndexHandle`] pairs a built index with its generation number
//!
//! Two builders ship with the crate: an exact brute-force [`FlatIndex`] and,
//! with the `hnsw` feature, an approximate USearch HNSW index.

mod flat;
#[cfg(feature = "hnsw")]
mod hnsw;

pub use flat::{FlatIndex, FlatIndexBuilder};
#[cfg(feature = "hnsw")]
pub use hnsw::{HnswIndex, HnswIndexBuilder};

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;

use crate::config::{IndexConfig, IndexKind};
use crate::types::{SearchResults, VectorBatch};

/// A built, read-only vector index
pub trait SearchIndex: Send + Sync {
    /// Return `k` neighbors per query, ascending by distance
    fn search(&self, queries: &VectorBatch, k: usize) -> Result<SearchResults>;

    /// Every vector the index was built from, in id order
    fn corpus(&self) -> &VectorBatch;

    /// Number of indexed vectors
    fn len(&self) -> usize {
        self.corpus().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Constructs new indexes for rebuilds. May be slow; must not mutate its inputs.
pub trait IndexBuilder: Send + Sync {
    fn build(&self, existing: &VectorBatch, new_batch: &VectorBatch) -> Result<Box<dyn SearchIndex>>;

    /// Short name for logs
    fn name(&self) -> &'static str;
}

/// Immutable snapshot of a built index plus its generation
pub struct IndexHandle {
    generation: u64,
    index: Box<dyn SearchIndex>,
    built_at: Instant,
    build_time: Duration,
}

impl IndexHandle {
    pub fn new(generation: u64, index: Box<dyn SearchIndex>, build_time: Duration) -> Self {
        Self {
            generation,
            index,
            built_at: Instant::now(),
            build_time,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn search(&self, queries: &VectorBatch, k: usize) -> Result<SearchResults> {
        self.index.search(queries, k)
    }

    pub fn corpus(&self) -> &VectorBatch {
        self.index.corpus()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Time since this handle was installed
    pub fn age(&self) -> Duration {
        self.built_at.elapsed()
    }

    /// How long the build took
    pub fn build_time(&self) -> Duration {
        self.build_time
    }
}

impl std::fmt::Debug for IndexHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexHandle")
            .field("generation", &self.generation)
            .field("len", &self.len())
            .field("build_time", &self.build_time)
            .finish()
    }
}

/// Pick the builder named by the configuration
pub fn builder_for(config: &IndexConfig) -> Result<Arc<dyn IndexBuilder>> {
    match config.kind {
        IndexKind::Flat => Ok(Arc::new(FlatIndexBuilder)),
        #[cfg(feature = "hnsw")]
        IndexKind::Hnsw => Ok(Arc::new(HnswIndexBuilder::new(config))),
        #[cfg(not(feature = "hnsw"))]
        IndexKind::Hnsw => anyhow::bail!("index kind 'hnsw' requires building with the `hnsw` feature"),
    }
}
