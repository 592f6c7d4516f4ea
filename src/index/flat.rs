//! Exact brute-force index using squared L2 distance

use anyhow::Result;
use tracing::debug;

use super::{IndexBuilder, SearchIndex};
use crate::types::{SearchResults, VectorBatch};

/// Exhaustive index: every query is compared against every stored vector
pub struct FlatIndex {
    corpus: VectorBatch,
}

impl FlatIndex {
    pub fn new(corpus: VectorBatch) -> Self {
        Self { corpus }
    }
}

impl SearchIndex for FlatIndex {
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
            let mut scored: Vec<(f32, i64)> = self
                .corpus
                .rows()
                .enumerate()
                .map(|(id, vector)| (squared_l2(query, vector), id as i64))
                .collect();

            // Ties resolve by ascending id
            let by_distance = |a: &(f32, i64), b: &(f32, i64)| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1));
            if scored.len() > k {
                scored.select_nth_unstable_by(k - 1, by_distance);
                scored.truncate(k);
            }
            scored.sort_unstable_by(by_distance);

            results.push_row(scored, k);
        }

        Ok(results)
    }

    fn corpus(&self) -> &VectorBatch {
        &self.corpus
    }
}

/// Builds a [`FlatIndex`] over the existing corpus followed by the new batch
#[derive(Debug, Default, Clone, Copy)]
pub struct FlatIndexBuilder;

impl IndexBuilder for FlatIndexBuilder {
    fn build(&self, existing: &VectorBatch, new_batch: &VectorBatch) -> Result<Box<dyn SearchIndex>> {
        let corpus = existing.concat(new_batch)?;
        debug!(
            "Built flat index: {} existing + {} new vectors",
            existing.len(),
            new_batch.len()
        );
        Ok(Box::new(FlatIndex::new(corpus)))
    }

    fn name(&self) -> &'static str {
        "flat"
    }
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}
