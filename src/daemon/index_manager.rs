//! Index Manager
//!
//! Owns the active index and drives its lifecycle:
//!
//! ```text
//! Empty --trigger--> Rebuilding --ok--> Active(gen + 1)
//! Active --trigger--> Rebuilding --err--> Active(unchanged)
//! ```
//!
//! The active handle sits behind a lock that is taken only to read the
//! pointer (searches) or replace it (swap). Builds run on a blocking
//! thread against a private candidate, so a search never waits on a build.
//! At most one rebuild runs at a time; triggers that arrive during a
//! rebuild are coalesced.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::ingest::IngestQueue;
use super::metrics::{DaemonMetrics, Timer};
use crate::config::{Config, RebuildConfig, DEFAULT_MAX_K};
use crate::index::{builder_for, IndexBuilder, IndexHandle};
use crate::types::{DimensionMismatch, EnqueueOutcome, ManagerState, SearchResults, VectorBatch};

/// Errors from index lifecycle operations
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("Index not ready: no index has been built yet")]
    NotReady,

    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(#[from] DimensionMismatch),

    #[error("k must be between 1 and {max}, got {k}")]
    InvalidK { k: usize, max: usize },

    #[error("Rebuild failed: {0}")]
    RebuildFailed(String),

    #[error("A rebuild is already in progress")]
    RebuildInProgress,

    #[error("Ingestion queue is full: {pending} pending + {incoming} incoming exceeds {limit}")]
    QueueFull {
        pending: usize,
        incoming: usize,
        limit: usize,
    },

    #[error("Search failed: {0}")]
    Search(String),
}

/// What happened to a rebuild trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// A new rebuild was started in the background
    Started,
    /// A rebuild was already running; this trigger was folded into it
    Coalesced,
}

/// Summary of a successful rebuild
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebuildReport {
    pub generation: u64,
    pub indexed_vectors: usize,
    pub added_vectors: usize,
    pub build_ms: u64,
}

/// Index statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexStats {
    pub state: ManagerState,
    pub generation: u64,
    pub indexed_vectors: usize,
    pub pending_vectors: usize,
    pub dimensions: usize,
    pub builder: String,
    pub last_rebuild_ms: Option<u64>,
    pub rebuilds_succeeded: u64,
    pub rebuilds_failed: u64,
    pub rebuilds_coalesced: u64,
}

/// Clears the rebuilding flag when the rebuild ends, however it ends
struct RebuildGuard {
    manager: Arc<IndexManager>,
}

impl Drop for RebuildGuard {
    fn drop(&mut self) {
        self.manager.rebuilding.store(false, Ordering::Release);
    }
}

/// Centralized index lifecycle management for the daemon
pub struct IndexManager {
    dimensions: usize,
    max_k: usize,
    builder: Arc<dyn IndexBuilder>,
    active: RwLock<Option<Arc<IndexHandle>>>,
    queue: IngestQueue,
    /// Base corpus for the very first build; dropped once an index exists
    seed: Mutex<Option<Arc<VectorBatch>>>,
    rebuilding: AtomicBool,
    requeue_on_failure: bool,
    generation: watch::Sender<u64>,
    last_rebuild: Mutex<Option<RebuildReport>>,
    metrics: Arc<DaemonMetrics>,
}

impl IndexManager {
    /// Create a manager from configuration. No index is built yet.
    pub fn new(config: &Config, metrics: Arc<DaemonMetrics>) -> Result<Arc<Self>> {
        let builder = builder_for(&config.index)?;
        let dimensions = config.index.dimensions;

        let seed = if config.index.seed_vectors > 0 {
            info!(
                "Seeding base corpus with {} random vectors (seed {})",
                config.index.seed_vectors, config.index.seed
            );
            Some(VectorBatch::random(dimensions, config.index.seed_vectors, config.index.seed))
        } else {
            None
        };

        Ok(Self::assemble(
            dimensions,
            config.index.max_k,
            builder,
            &config.rebuild,
            seed,
            metrics,
        ))
    }

    /// Create a manager around an explicit builder
    pub fn with_builder(
        dimensions: usize,
        builder: Arc<dyn IndexBuilder>,
        rebuild: &RebuildConfig,
        seed: Option<VectorBatch>,
        metrics: Arc<DaemonMetrics>,
    ) -> Arc<Self> {
        Self::assemble(dimensions, DEFAULT_MAX_K, builder, rebuild, seed, metrics)
    }

    fn assemble(
        dimensions: usize,
        max_k: usize,
        builder: Arc<dyn IndexBuilder>,
        rebuild: &RebuildConfig,
        seed: Option<VectorBatch>,
        metrics: Arc<DaemonMetrics>,
    ) -> Arc<Self> {
        let (generation, _) = watch::channel(0);
        Arc::new(Self {
            dimensions,
            max_k,
            builder,
            active: RwLock::new(None),
            queue: IngestQueue::new(dimensions, rebuild.max_pending_vectors),
            seed: Mutex::new(seed.map(Arc::new)),
            rebuilding: AtomicBool::new(false),
            requeue_on_failure: rebuild.requeue_on_failure,
            generation,
            last_rebuild: Mutex::new(None),
            metrics,
        })
    }

    /// Search the active index.
    ///
    /// Returns one row per query with exactly `k` neighbors each.
    pub fn search(&self, queries: &VectorBatch, k: usize) -> Result<SearchResults, IndexError> {
        self.check_k(k)?;
        if !queries.is_empty() && queries.dimensions() != self.dimensions {
            return Err(IndexError::DimensionMismatch(DimensionMismatch {
                position: 0,
                expected: self.dimensions,
                got: queries.dimensions(),
            }));
        }

        // The handle stays valid for this search even if a swap happens meanwhile
        let handle = self.active.read().clone().ok_or(IndexError::NotReady)?;

        let timer = Timer::start();
        self.metrics.searches_total.inc();
        self.metrics.queries_total.add(queries.len() as u64);

        match handle.search(queries, k) {
            Ok(results) => {
                let elapsed = timer.record(&self.metrics.search_latency);
                debug!(
                    "Searched {} queries (k={}) on generation {} in {:?}",
                    queries.len(),
                    k,
                    handle.generation(),
                    elapsed
                );
                Ok(results)
            }
            Err(e) => {
                self.metrics.searches_failed.inc();
                error!("Search failed on generation {}: {}", handle.generation(), e);
                Err(IndexError::Search(e.to_string()))
            }
        }
    }

    /// Queue vectors for the next rebuild. Never waits on searches or rebuilds.
    pub fn enqueue(&self, batch: VectorBatch) -> Result<EnqueueOutcome, IndexError> {
        match self.queue.enqueue(batch) {
            Ok(outcome) => {
                if let EnqueueOutcome::Queued { added, queue_len } = outcome {
                    self.metrics.vectors_queued.add(added as u64);
                    self.metrics.pending_vectors.set(queue_len as u64);
                }
                Ok(outcome)
            }
            Err(e) => {
                self.metrics.batches_rejected.inc();
                warn!("Rejected vector batch: {}", e);
                Err(e)
            }
        }
    }

    /// Start a rebuild in the background, or coalesce into the one already running
    pub fn trigger_rebuild(self: &Arc<Self>) -> TriggerOutcome {
        let Some(guard) = self.try_begin_rebuild() else {
            self.metrics.rebuilds_coalesced.inc();
            debug!("Rebuild already in progress; trigger coalesced");
            return TriggerOutcome::Coalesced;
        };

        // Drained here so everything queued before the trigger is in this build
        let new_batch = self.drain_for_rebuild();
        let manager = self.clone();
        tokio::spawn(async move {
            // Failures are logged and counted inside run_rebuild
            let _ = manager.run_rebuild(guard, new_batch).await;
        });
        TriggerOutcome::Started
    }

    /// Run a rebuild and wait for it to finish
    pub async fn rebuild_now(self: &Arc<Self>) -> Result<RebuildReport, IndexError> {
        let guard = self.try_begin_rebuild().ok_or(IndexError::RebuildInProgress)?;
        let new_batch = self.drain_for_rebuild();
        self.run_rebuild(guard, new_batch).await
    }

    fn try_begin_rebuild(self: &Arc<Self>) -> Option<RebuildGuard> {
        self.rebuilding
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RebuildGuard {
                manager: self.clone(),
            })
    }

    fn drain_for_rebuild(&self) -> VectorBatch {
        self.metrics.rebuilds_started.inc();
        let new_batch = self.queue.drain();
        self.metrics.pending_vectors.set(self.queue.len() as u64);
        new_batch
    }

    async fn run_rebuild(&self, _guard: RebuildGuard, new_batch: VectorBatch) -> Result<RebuildReport, IndexError> {
        let added = new_batch.len();

        let current = self.active.read().clone();
        let seed = self.seed.lock().clone();
        let dimensions = self.dimensions;
        let builder = self.builder.clone();

        info!(
            "Rebuilding {} index: {} existing + {} new vectors",
            builder.name(),
            current
                .as_ref()
                .map(|h| h.len())
                .or_else(|| seed.as_ref().map(|s| s.len()))
                .unwrap_or(0),
            added
        );

        let timer = Timer::start();
        let outcome = tokio::task::spawn_blocking(move || {
            let empty = VectorBatch::empty(dimensions);
            let existing = match (&current, &seed) {
                (Some(handle), _) => handle.corpus(),
                (None, Some(seed)) => &**seed,
                (None, None) => &empty,
            };
            let built = builder.build(existing, &new_batch);
            (built, new_batch)
        })
        .await;
        let build_time = timer.record(&self.metrics.rebuild_latency);

        let index = match outcome {
            Ok((Ok(index), _)) => index,
            Ok((Err(e), new_batch)) => return Err(self.rebuild_failed(e.to_string(), Some(new_batch))),
            Err(e) => return Err(self.rebuild_failed(format!("build task failed: {}", e), None)),
        };

        let handle = {
            let mut active = self.active.write();
            let generation = active.as_ref().map_or(0, |h| h.generation()) + 1;
            let handle = Arc::new(IndexHandle::new(generation, index, build_time));
            *active = Some(handle.clone());
            handle
        };
        self.seed.lock().take();
        self.generation.send_replace(handle.generation());

        let report = RebuildReport {
            generation: handle.generation(),
            indexed_vectors: handle.len(),
            added_vectors: added,
            build_ms: build_time.as_millis() as u64,
        };
        *self.last_rebuild.lock() = Some(report);

        self.metrics.rebuilds_succeeded.inc();
        self.metrics.index_generation.set(report.generation);
        self.metrics.indexed_vectors.set(report.indexed_vectors as u64);
        info!(
            "Installed index generation {} ({} vectors) in {:?}",
            report.generation, report.indexed_vectors, build_time
        );
        Ok(report)
    }

    fn rebuild_failed(&self, reason: String, drained: Option<VectorBatch>) -> IndexError {
        self.metrics.rebuilds_failed.inc();
        error!("Rebuild failed, keeping generation {}: {}", self.generation(), reason);

        match drained {
            Some(batch) if self.requeue_on_failure => {
                info!("Requeueing {} vectors from failed rebuild", batch.len());
                self.queue.requeue(batch);
                self.metrics.pending_vectors.set(self.queue.len() as u64);
            }
            Some(batch) if !batch.is_empty() => {
                warn!("Dropping {} vectors from failed rebuild", batch.len());
            }
            Some(_) => {}
            None => warn!("Vectors drained for the failed rebuild were lost"),
        }

        IndexError::RebuildFailed(reason)
    }

    pub fn state(&self) -> ManagerState {
        if self.rebuilding.load(Ordering::Acquire) {
            ManagerState::Rebuilding
        } else if self.active.read().is_some() {
            ManagerState::Active
        } else {
            ManagerState::Empty
        }
    }

    /// Whether an index has been installed
    pub fn is_ready(&self) -> bool {
        self.active.read().is_some()
    }

    /// Generation of the active index (0 before the first build)
    pub fn generation(&self) -> u64 {
        *self.generation.borrow()
    }

    /// Watch the active generation; changes on every swap
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.generation.subscribe()
    }

    /// Wait until the active generation reaches at least `generation`
    pub async fn wait_for_generation(&self, generation: u64) {
        let mut rx = self.subscribe();
        let _ = rx.wait_for(|current| *current >= generation).await;
    }

    /// The currently active handle, if any
    pub fn active(&self) -> Option<Arc<IndexHandle>> {
        self.active.read().clone()
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Largest `k` a search may ask for
    pub fn max_k(&self) -> usize {
        self.max_k
    }

    /// Reject `k` outside `1..=max_k` before anything is sized by it
    pub fn check_k(&self, k: usize) -> Result<(), IndexError> {
        if k == 0 || k > self.max_k {
            return Err(IndexError::InvalidK { k, max: self.max_k });
        }
        Ok(())
    }

    pub fn pending_count(&self) -> usize {
        self.queue.len()
    }

    pub fn last_rebuild(&self) -> Option<RebuildReport> {
        *self.last_rebuild.lock()
    }

    pub fn metrics(&self) -> &Arc<DaemonMetrics> {
        &self.metrics
    }

    /// Get index statistics
    pub fn stats(&self) -> IndexStats {
        let active = self.active();
        IndexStats {
            state: self.state(),
            generation: active.as_ref().map_or(0, |h| h.generation()),
            indexed_vectors: active.as_ref().map_or(0, |h| h.len()),
            pending_vectors: self.queue.len(),
            dimensions: self.dimensions,
            builder: self.builder.name().to_string(),
            last_rebuild_ms: self.last_rebuild().map(|r| r.build_ms),
            rebuilds_succeeded: self.metrics.rebuilds_succeeded.get(),
            rebuilds_failed: self.metrics.rebuilds_failed.get(),
            rebuilds_coalesced: self.metrics.rebuilds_coalesced.get(),
        }
    }

    /// Time since the active index was installed
    pub fn index_age(&self) -> Option<Duration> {
        self.active().map(|h| h.age())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{FlatIndexBuilder, SearchIndex};
    use std::sync::mpsc;

    const DIM: usize = 4;

    fn rebuild_config() -> RebuildConfig {
        RebuildConfig {
            max_pending_vectors: 1000,
            ..RebuildConfig::default()
        }
    }

    fn flat_manager() -> Arc<IndexManager> {
        IndexManager::with_builder(
            DIM,
            Arc::new(FlatIndexBuilder),
            &rebuild_config(),
            None,
            DaemonMetrics::shared(),
        )
    }

    /// Blocks each build until the test releases it
    struct GatedBuilder {
        gate: Mutex<mpsc::Receiver<()>>,
    }

    impl IndexBuilder for GatedBuilder {
        fn build(&self, existing: &VectorBatch, new_batch: &VectorBatch) -> Result<Box<dyn SearchIndex>> {
            self.gate.lock().recv_timeout(Duration::from_secs(10))?;
            FlatIndexBuilder.build(existing, new_batch)
        }

        fn name(&self) -> &'static str {
            "gated"
        }
    }

    /// Fails every build after the first `allow` builds
    struct FlakyBuilder {
        allow: std::sync::atomic::AtomicUsize,
    }

    impl IndexBuilder for FlakyBuilder {
        fn build(&self, existing: &VectorBatch, new_batch: &VectorBatch) -> Result<Box<dyn SearchIndex>> {
            let left = self.allow.load(Ordering::SeqCst);
            if left == 0 {
                anyhow::bail!("builder out of memory");
            }
            self.allow.store(left - 1, Ordering::SeqCst);
            FlatIndexBuilder.build(existing, new_batch)
        }

        fn name(&self) -> &'static str {
            "flaky"
        }
    }

    fn gated_manager() -> (Arc<IndexManager>, mpsc::Sender<()>) {
        let (tx, rx) = mpsc::channel();
        let manager = IndexManager::with_builder(
            DIM,
            Arc::new(GatedBuilder { gate: Mutex::new(rx) }),
            &rebuild_config(),
            None,
            DaemonMetrics::shared(),
        );
        (manager, tx)
    }

    fn flaky_manager(allow: usize, requeue: bool) -> Arc<IndexManager> {
        let rebuild = RebuildConfig {
            requeue_on_failure: requeue,
            ..rebuild_config()
        };
        IndexManager::with_builder(
            DIM,
            Arc::new(FlakyBuilder {
                allow: std::sync::atomic::AtomicUsize::new(allow),
            }),
            &rebuild,
            None,
            DaemonMetrics::shared(),
        )
    }

    fn vectors(count: usize, offset: f32) -> VectorBatch {
        VectorBatch::from_rows(
            DIM,
            (0..count).map(|i| vec![offset + i as f32; DIM]).collect(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_search_before_first_build_is_not_ready() {
        let manager = flat_manager();
        assert_eq!(manager.state(), ManagerState::Empty);
        assert!(matches!(manager.search(&vectors(1, 0.0), 3), Err(IndexError::NotReady)));
    }

    #[tokio::test]
    async fn test_enqueue_rebuild_search_scenario() {
        let manager = flat_manager();
        assert!(matches!(
            manager.enqueue(vectors(5, 0.0)).unwrap(),
            EnqueueOutcome::Queued { added: 5, queue_len: 5 }
        ));

        let report = manager.rebuild_now().await.unwrap();
        assert_eq!(report.generation, 1);
        assert_eq!(report.indexed_vectors, 5);
        assert_eq!(manager.pending_count(), 0);
        assert_eq!(manager.state(), ManagerState::Active);

        let results = manager.search(&vectors(2, 0.1), 3).unwrap();
        assert_eq!(results.len(), 2);
        for (distances, indices) in results.distances.iter().zip(&results.indices) {
            assert_eq!(distances.len(), 3);
            assert_eq!(indices.len(), 3);
            assert!(distances.windows(2).all(|w| w[0] <= w[1]));
            assert!(indices.iter().all(|&i| (0..5).contains(&i)));
        }
        assert_eq!(results.indices[0][0], 0);
        assert_eq!(results.indices[1][0], 1);
    }

    #[tokio::test]
    async fn test_search_validates_k_and_dimension() {
        let manager = flat_manager();
        manager.enqueue(vectors(2, 0.0)).unwrap();
        manager.rebuild_now().await.unwrap();

        assert!(matches!(
            manager.search(&vectors(1, 0.0), 0),
            Err(IndexError::InvalidK { k: 0, .. })
        ));
        assert!(matches!(
            manager.search(&vectors(1, 0.0), 1 << 40),
            Err(IndexError::InvalidK { max: DEFAULT_MAX_K, .. })
        ));
        assert!(manager.search(&vectors(1, 0.0), DEFAULT_MAX_K).is_ok());

        let wrong = VectorBatch::from_rows(DIM + 1, vec![vec![0.0; DIM + 1]]).unwrap();
        assert!(matches!(manager.search(&wrong, 1), Err(IndexError::DimensionMismatch(_))));
    }

    #[tokio::test]
    async fn test_generation_strictly_increases() {
        let manager = flat_manager();
        let mut seen = Vec::new();
        for round in 0..3 {
            manager.enqueue(vectors(2, round as f32 * 10.0)).unwrap();
            seen.push(manager.rebuild_now().await.unwrap().generation);
        }
        assert_eq!(seen, vec![1, 2, 3]);
        assert_eq!(manager.generation(), 3);
        assert_eq!(manager.active().unwrap().len(), 6);
    }

    #[tokio::test]
    async fn test_trigger_during_rebuild_is_coalesced() {
        let (manager, gate) = gated_manager();
        manager.enqueue(vectors(3, 0.0)).unwrap();

        assert_eq!(manager.trigger_rebuild(), TriggerOutcome::Started);
        assert_eq!(manager.trigger_rebuild(), TriggerOutcome::Coalesced);
        assert!(matches!(manager.rebuild_now().await, Err(IndexError::RebuildInProgress)));
        assert_eq!(manager.state(), ManagerState::Rebuilding);

        gate.send(()).unwrap();
        manager.wait_for_generation(1).await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(manager.generation(), 1);
        assert_eq!(manager.metrics().rebuilds_started.get(), 1);
        assert_eq!(manager.metrics().rebuilds_coalesced.get(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_search_is_served_while_rebuilding() {
        let (manager, gate) = gated_manager();
        manager.enqueue(vectors(3, 0.0)).unwrap();
        gate.send(()).unwrap();
        manager.rebuild_now().await.unwrap();

        manager.enqueue(vectors(3, 100.0)).unwrap();
        assert_eq!(manager.trigger_rebuild(), TriggerOutcome::Started);
        assert_eq!(manager.pending_count(), 0);

        // The build is parked on the gate; searches keep using generation 1
        let results = manager.search(&vectors(1, 0.0), 5).unwrap();
        assert_eq!(results.indices[0][..3], [0, 1, 2]);
        assert_eq!(results.indices[0][3], crate::types::MISSING_ID);
        assert_eq!(manager.generation(), 1);
        assert_eq!(manager.state(), ManagerState::Rebuilding);

        // Enqueue does not wait on the rebuild either
        manager.enqueue(vectors(1, 50.0)).unwrap();

        gate.send(()).unwrap();
        manager.wait_for_generation(2).await;
        assert_eq!(manager.active().unwrap().len(), 6);
        assert_eq!(manager.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_trigger_takes_only_vectors_queued_before_it() {
        let manager = flat_manager();
        manager.enqueue(vectors(4, 0.0)).unwrap();

        assert_eq!(manager.trigger_rebuild(), TriggerOutcome::Started);
        // The build task has not run yet on this runtime
        manager.enqueue(vectors(1, 50.0)).unwrap();

        manager.wait_for_generation(1).await;
        assert_eq!(manager.active().unwrap().len(), 4);
        assert_eq!(manager.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_rebuild_keeps_old_index_and_drops_batch() {
        let manager = flaky_manager(1, false);
        manager.enqueue(vectors(2, 0.0)).unwrap();
        manager.rebuild_now().await.unwrap();

        manager.enqueue(vectors(3, 10.0)).unwrap();
        let err = manager.rebuild_now().await.unwrap_err();
        assert!(matches!(err, IndexError::RebuildFailed(_)));

        assert_eq!(manager.generation(), 1);
        assert_eq!(manager.state(), ManagerState::Active);
        assert_eq!(manager.active().unwrap().len(), 2);
        assert_eq!(manager.pending_count(), 0);
        assert!(manager.search(&vectors(1, 0.0), 1).is_ok());
        assert_eq!(manager.stats().rebuilds_failed, 1);
    }

    #[tokio::test]
    async fn test_failed_rebuild_requeues_when_enabled() {
        let manager = flaky_manager(0, true);
        manager.enqueue(vectors(3, 0.0)).unwrap();
        assert!(manager.rebuild_now().await.is_err());

        assert_eq!(manager.pending_count(), 3);
        assert_eq!(manager.state(), ManagerState::Empty);
    }

    #[tokio::test]
    async fn test_first_build_includes_seed_corpus() {
        let mut config = Config::default();
        config.index.dimensions = DIM;
        config.index.seed_vectors = 10;
        let manager = IndexManager::new(&config, DaemonMetrics::shared()).unwrap();

        manager.enqueue(vectors(5, 0.0)).unwrap();
        let report = manager.rebuild_now().await.unwrap();
        assert_eq!(report.indexed_vectors, 15);
        assert_eq!(report.added_vectors, 5);

        assert_eq!(manager.max_k(), config.index.max_k);

        let stats = manager.stats();
        assert_eq!(stats.indexed_vectors, 15);
        assert_eq!(stats.builder, "flat");
        assert!(stats.last_rebuild_ms.is_some());
    }
}
