//! Approximate HNSW index using USearch

use anyhow::{Context, Result};
use tracing::info;
use usearch::{Index, IndexOptions, MetricKind, ScalarKind};

use super::{IndexBuilder, SearchIndex};
use crate::config::IndexConfig;
use crate::types::{SearchResults, VectorBatch};

/// HNSW graph over a corpus; keys are corpus positions
pub struct HnswIndex {
    index: Index,
    corpus: VectorBatch,
}

impl HnswIndex {
    fn options(dimensions: usize, config: &IndexConfig) -> IndexOptions {
        IndexOptions {
            dimensions,
            metric: MetricKind::L2sq,
            quantization: ScalarKind::F32,
            connectivity: config.hnsw_m,
            expansion_add: config.hnsw_ef_construction,
            expansion_search: config.hnsw_ef_search,
            multi: false,
        }
    }

    /// Build the graph over every vector in `corpus`
    pub fn build(corpus: VectorBatch, config: &IndexConfig) -> Result<Self> {
        let index = Index::new(&Self::options(corpus.dimensions(), config))
            .context("Failed to create USearch index")?;
        index
            .reserve(corpus.len().max(1))
            .context("Failed to reserve index capacity")?;

        for (key, vector) in corpus.rows().enumerate() {
            index
                .add(key as u64, vector)
                .with_context(|| format!("Failed to add vector {}", key))?;
        }

        Ok(Self { index, corpus })
    }
}

impl SearchIndex for HnswIndex {
    fn search(&self, queries: &VectorBatch, k: usize) -> Result<SearchResults> {
        anyhow::ensure!(k > 0, "k must be at least 1");
        anyhow::ensure!(
            queries.is_empty() || queries.dimensions() == self.corpus.dimensions(),
            "Query dimension mismatch: expected {}, got {}",
            self.corpus.dimensions(),
            queries.dimensions()
        );

        let mut results = SearchResults::with_capacity(queries.len());
        for query in queries.rows() {
            let matches = if self.corpus.is_empty() {
                Vec::new()
            } else {
                let found = self.index.search(query, k).context("Search failed")?;
                found
                    .distances
                    .iter()
                    .zip(found.keys.iter())
                    .map(|(&distance, &key)| (distance, key as i64))
                    .collect()
            };
            results.push_row(matches, k);
        }

        Ok(results)
    }

    fn corpus(&self) -> &VectorBatch {
        &self.corpus
    }
}

/// Builds [`HnswIndex`] snapshots with the configured graph parameters
pub struct HnswIndexBuilder {
    config: IndexConfig,
}

impl HnswIndexBuilder {
    pub fn new(config: &IndexConfig) -> Self {
        info!(
            "Using HNSW index builder: M={}, ef_construction={}, ef_search={}",
            config.hnsw_m, config.hnsw_ef_construction, config.hnsw_ef_search
        );
        Self {
            config: config.clone(),
        }
    }
}

impl IndexBuilder for HnswIndexBuilder {
    fn build(&self, existing: &VectorBatch, new_batch: &VectorBatch) -> Result<Box<dyn SearchIndex>> {
        let corpus = existing.concat(new_batch)?;
        Ok(Box::new(HnswIndex::build(corpus, &self.config)?))
    }

    fn name(&self) -> &'static str {
        "hnsw"
    }
}
