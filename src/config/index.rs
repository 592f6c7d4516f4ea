//! Index and rebuild configuration

use serde::{Deserialize, Serialize};

/// Which index builder produces new generations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    /// Exact brute-force search
    #[default]
    Flat,
    /// Approximate HNSW graph (requires the `hnsw` feature)
    Hnsw,
}

/// Default ceiling on neighbors per query
pub const DEFAULT_MAX_K: usize = 10_000;

/// Vector index configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Vector dimension, fixed for the process lifetime
    pub dimensions: usize,
    /// Index implementation
    pub kind: IndexKind,
    /// HNSW M parameter (connections per layer)
    pub hnsw_m: usize,
    /// HNSW ef_construction parameter
    pub hnsw_ef_construction: usize,
    /// HNSW ef_search parameter
    pub hnsw_ef_search: usize,
    /// Number of synthetic base vectors the first build starts from
    pub seed_vectors: usize,
    /// RNG seed for the synthetic base corpus
    pub seed: u64,
    /// Neighbors returned when an HTTP caller omits `k`
    pub default_k: usize,
    /// Largest `k` a search may ask for
    pub max_k: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            dimensions: 1000,
            kind: IndexKind::Flat,
            hnsw_m: 16,
            hnsw_ef_construction: 200,
            hnsw_ef_search: 100,
            seed_vectors: 0,
            seed: 42,
            default_k: 10,
            max_k: DEFAULT_MAX_K,
        }
    }
}

/// Background rebuild configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RebuildConfig {
    /// Seconds between scheduled rebuilds (0 disables the timer)
    pub interval_secs: u64,
    /// Trigger one rebuild as soon as the daemon starts
    pub on_startup: bool,
    /// Put drained vectors back on the queue when a rebuild fails
    pub requeue_on_failure: bool,
    /// Maximum vectors waiting for the next rebuild
    pub max_pending_vectors: usize,
}

impl Default for RebuildConfig {
    fn default() -> Self {
        Self {
            interval_secs: 2 * 60 * 60,
            on_startup: true,
            requeue_on_failure: false,
            max_pending_vectors: 1_000_000,
        }
    }
}

impl RebuildConfig {
    /// Scheduled rebuild period, `None` when the timer is disabled
    pub fn interval(&self) -> Option<std::time::Duration> {
        (self.interval_secs > 0).then(|| std::time::Duration::from_secs(self.interval_secs))
    }
}
