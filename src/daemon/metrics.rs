//! Daemon Metrics Collection
//!
//! Tracks search, ingestion, rebuild and connection metrics for the daemon.

use std::fmt::Write as FmtWrite;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Atomic counter for thread-safe incrementing
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    /// Create a new counter
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    /// Increment the counter by 1
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the counter by a value
    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    /// Get the current value
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Atomic gauge for thread-safe value tracking
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    /// Create a new gauge
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    /// Set the gauge value
    pub fn set(&self, value: u64) {
        self.value.store(value, Ordering::Relaxed);
    }

    /// Increment the gauge
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrement the gauge
    pub fn dec(&self) {
        self.value.fetch_sub(1, Ordering::Relaxed);
    }

    /// Get the current value
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Simple histogram for latency tracking
#[derive(Debug)]
pub struct Histogram {
    /// Bucket boundaries in microseconds
    buckets: Vec<u64>,
    /// Count per bucket
    counts: Vec<AtomicU64>,
    /// Overflow count (values exceeding all bucket boundaries)
    overflow: AtomicU64,
    /// Sum of all values (for mean calculation)
    sum: AtomicU64,
    /// Total count
    count: AtomicU64,
}

impl Histogram {
    /// Create a new histogram with default latency buckets (in ms)
    pub fn new_latency() -> Self {
        // Buckets: 1ms, 5ms, 10ms, 25ms, 50ms, 100ms, 250ms, 500ms, 1s, 5s
        Self::with_buckets(vec![
            1000, 5000, 10000, 25000, 50000, 100000, 250000, 500000, 1000000, 5000000,
        ])
    }

    /// Record a duration
    pub fn observe(&self, duration: Duration) {
        let micros = duration.as_micros() as u64;
        self.sum.fetch_add(micros, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);

        // Increment the appropriate bucket
        for (i, &boundary) in self.buckets.iter().enumerate() {
            if micros <= boundary {
                self.counts[i].fetch_add(1, Ordering::Relaxed);
                return;
            }
        }
        // Greater than all buckets - increment overflow
        self.overflow.fetch_add(1, Ordering::Relaxed);
    }

    /// Create a histogram sized for index builds: 10ms up to 10 minutes
    pub fn new_build() -> Self {
        Self::with_buckets(vec![
            10_000, 100_000, 500_000, 1_000_000, 5_000_000, 15_000_000, 60_000_000, 180_000_000,
            600_000_000,
        ])
    }

    fn with_buckets(buckets: Vec<u64>) -> Self {
        let counts = buckets.iter().map(|_| AtomicU64::new(0)).collect();
        Self {
            buckets,
            counts,
            overflow: AtomicU64::new(0),
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Get the count of observations
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Get the mean value in microseconds
    pub fn mean_micros(&self) -> f64 {
        let count = self.count.load(Ordering::Relaxed);
        if count == 0 {
            return 0.0;
        }
        self.sum.load(Ordering::Relaxed) as f64 / count as f64
    }

    /// Get the mean value in milliseconds
    pub fn mean_ms(&self) -> f64 {
        self.mean_micros() / 1000.0
    }

    /// Get bucket boundaries in microseconds
    pub fn bucket_boundaries(&self) -> &[u64] {
        &self.buckets
    }

    /// Get bucket counts (non-cumulative)
    pub fn bucket_counts(&self) -> Vec<u64> {
        self.counts.iter().map(|c| c.load(Ordering::Relaxed)).collect()
    }

    /// Get the overflow count
    pub fn overflow_count(&self) -> u64 {
        self.overflow.load(Ordering::Relaxed)
    }

    /// Get the sum of all observed values in microseconds
    pub fn sum_micros(&self) -> u64 {
        self.sum.load(Ordering::Relaxed)
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new_latency()
    }
}

/// All daemon metrics
#[derive(Debug)]
pub struct DaemonMetrics {
    // Search metrics
    pub searches_total: Counter,
    pub search_latency: Histogram,
    pub searches_failed: Counter,
    pub queries_total: Counter,

    // Ingestion metrics
    pub vectors_queued: Counter,
    pub batches_rejected: Counter,
    pub pending_vectors: Gauge,

    // Rebuild metrics
    pub rebuilds_started: Counter,
    pub rebuilds_succeeded: Counter,
    pub rebuilds_failed: Counter,
    pub rebuilds_coalesced: Counter,
    pub rebuild_latency: Histogram,
    pub index_generation: Gauge,
    pub indexed_vectors: Gauge,

    // Connection metrics
    pub connections_total: Counter,
    pub active_connections: Gauge,
    pub rpc_requests_total: Counter,

    // Resource metrics
    pub memory_usage_bytes: Gauge,

    // HTTP metrics
    pub http_requests_total: Counter,
    pub http_request_latency: Histogram,
}

impl Default for DaemonMetrics {
    fn default() -> Self {
        Self {
            searches_total: Counter::new(),
            search_latency: Histogram::new_latency(),
            searches_failed: Counter::new(),
            queries_total: Counter::new(),
            vectors_queued: Counter::new(),
            batches_rejected: Counter::new(),
            pending_vectors: Gauge::new(),
            rebuilds_started: Counter::new(),
            rebuilds_succeeded: Counter::new(),
            rebuilds_failed: Counter::new(),
            rebuilds_coalesced: Counter::new(),
            rebuild_latency: Histogram::new_build(),
            index_generation: Gauge::new(),
            indexed_vectors: Gauge::new(),
            connections_total: Counter::new(),
            active_connections: Gauge::new(),
            rpc_requests_total: Counter::new(),
            memory_usage_bytes: Gauge::new(),
            http_requests_total: Counter::new(),
            http_request_latency: Histogram::new_latency(),
        }
    }
}

impl DaemonMetrics {
    /// Create new metrics
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a shareable metrics instance
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Take a snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            searches_total: self.searches_total.get(),
            search_latency_ms: self.search_latency.mean_ms(),
            searches_failed: self.searches_failed.get(),
            queries_total: self.queries_total.get(),

            vectors_queued: self.vectors_queued.get(),
            batches_rejected: self.batches_rejected.get(),
            pending_vectors: self.pending_vectors.get(),

            rebuilds_started: self.rebuilds_started.get(),
            rebuilds_succeeded: self.rebuilds_succeeded.get(),
            rebuilds_failed: self.rebuilds_failed.get(),
            rebuilds_coalesced: self.rebuilds_coalesced.get(),
            rebuild_latency_ms: self.rebuild_latency.mean_ms(),
            index_generation: self.index_generation.get(),
            indexed_vectors: self.indexed_vectors.get(),

            connections_total: self.connections_total.get(),
            active_connections: self.active_connections.get(),
            rpc_requests_total: self.rpc_requests_total.get(),

            memory_usage_bytes: self.memory_usage_bytes.get(),

            http_requests_total: self.http_requests_total.get(),
        }
    }

    /// Update memory usage from system
    pub fn update_memory_usage(&self) {
        if let Some(usage) = get_memory_usage() {
            self.memory_usage_bytes.set(usage);
        }
    }

    /// Export all metrics in Prometheus exposition format
    pub fn to_prometheus(&self) -> String {
        let mut out = String::with_capacity(4096);

        // Search metrics
        write_counter(&mut out, "vindex_searches_total", "Total number of search calls", self.searches_total.get());
        write_histogram(&mut out, "vindex_search_latency_seconds", "Search latency in seconds", &self.search_latency);
        write_counter(&mut out, "vindex_searches_failed_total", "Total number of failed search calls", self.searches_failed.get());
        write_counter(&mut out, "vindex_queries_total", "Total number of query vectors searched", self.queries_total.get());

        // Ingestion metrics
        write_counter(&mut out, "vindex_vectors_queued_total", "Total number of vectors queued for indexing", self.vectors_queued.get());
        write_counter(&mut out, "vindex_batches_rejected_total", "Total number of rejected vector batches", self.batches_rejected.get());
        write_gauge(&mut out, "vindex_pending_vectors", "Vectors waiting for the next rebuild", self.pending_vectors.get());

        // Rebuild metrics
        write_counter(&mut out, "vindex_rebuilds_started_total", "Total number of rebuilds started", self.rebuilds_started.get());
        write_counter(&mut out, "vindex_rebuilds_succeeded_total", "Total number of successful rebuilds", self.rebuilds_succeeded.get());
        write_counter(&mut out, "vindex_rebuilds_failed_total", "Total number of failed rebuilds", self.rebuilds_failed.get());
        write_counter(&mut out, "vindex_rebuilds_coalesced_total", "Rebuild triggers ignored while a rebuild was running", self.rebuilds_coalesced.get());
        write_histogram(&mut out, "vindex_rebuild_latency_seconds", "Rebuild duration in seconds", &self.rebuild_latency);
        write_gauge(&mut out, "vindex_index_generation", "Generation of the active index", self.index_generation.get());
        write_gauge(&mut out, "vindex_indexed_vectors", "Vectors in the active index", self.indexed_vectors.get());

        // Connection metrics
        write_counter(&mut out, "vindex_connections_total", "Total number of RPC connections", self.connections_total.get());
        write_gauge(&mut out, "vindex_active_connections", "Number of active RPC connections", self.active_connections.get());
        write_counter(&mut out, "vindex_rpc_requests_total", "Total RPC requests dispatched", self.rpc_requests_total.get());

        // Resource metrics
        write_gauge(&mut out, "vindex_memory_usage_bytes", "Current memory usage in bytes", self.memory_usage_bytes.get());

        // HTTP metrics
        write_counter(&mut out, "vindex_http_requests_total", "Total HTTP requests", self.http_requests_total.get());
        write_histogram(&mut out, "vindex_http_request_latency_seconds", "HTTP request latency in seconds", &self.http_request_latency);

        out
    }
}

/// Write a counter metric in Prometheus exposition format
fn write_counter(out: &mut String, name: &str, help: &str, value: u64) {
    let _ = writeln!(out, "# HELP {} {}", name, help);
    let _ = writeln!(out, "# TYPE {} counter", name);
    let _ = writeln!(out, "{} {}", name, value);
    let _ = writeln!(out);
}

/// Write a gauge metric in Prometheus exposition format
fn write_gauge(out: &mut String, name: &str, help: &str, value: u64) {
    let _ = writeln!(out, "# HELP {} {}", name, help);
    let _ = writeln!(out, "# TYPE {} gauge", name);
    let _ = writeln!(out, "{} {}", name, value);
    let _ = writeln!(out);
}

/// Write a histogram metric in Prometheus exposition format
fn write_histogram(out: &mut String, name: &str, help: &str, hist: &Histogram) {
    let _ = writeln!(out, "# HELP {} {}", name, help);
    let _ = writeln!(out, "# TYPE {} histogram", name);

    let boundaries = hist.bucket_boundaries();
    let counts = hist.bucket_counts();

    // Cumulative: each le bucket includes all lower buckets
    let mut cumulative: u64 = 0;
    for (i, &boundary) in boundaries.iter().enumerate() {
        cumulative += counts[i];
        let le_seconds = boundary as f64 / 1_000_000.0;
        let _ = writeln!(out, "{}_bucket{{le=\"{:.3}\"}} {}", name, le_seconds, cumulative);
    }
    let total_count = hist.count();
    let _ = writeln!(out, "{}_bucket{{le=\"+Inf\"}} {}", name, total_count);

    let sum_seconds = hist.sum_micros() as f64 / 1_000_000.0;
    let _ = writeln!(out, "{}_sum {:.6}", name, sum_seconds);
    let _ = writeln!(out, "{}_count {}", name, total_count);
    let _ = writeln!(out);
}

/// Point-in-time snapshot of all metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    // Search metrics
    pub searches_total: u64,
    pub search_latency_ms: f64,
    pub searches_failed: u64,
    pub queries_total: u64,

    // Ingestion metrics
    pub vectors_queued: u64,
    pub batches_rejected: u64,
    pub pending_vectors: u64,

    // Rebuild metrics
    pub rebuilds_started: u64,
    pub rebuilds_succeeded: u64,
    pub rebuilds_failed: u64,
    pub rebuilds_coalesced: u64,
    pub rebuild_latency_ms: f64,
    pub index_generation: u64,
    pub indexed_vectors: u64,

    // Connection metrics
    pub connections_total: u64,
    pub active_connections: u64,
    pub rpc_requests_total: u64,

    // Resource metrics
    pub memory_usage_bytes: u64,

    // HTTP metrics
    pub http_requests_total: u64,
}

/// Helper for timing operations
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Start a new timer
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed duration
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Record to histogram and return elapsed
    pub fn record(self, histogram: &Histogram) -> Duration {
        let elapsed = self.elapsed();
        histogram.observe(elapsed);
        elapsed
    }
}

/// Get current process memory usage in bytes
pub(super) fn get_memory_usage() -> Option<u64> {
    #[cfg(target_os = "linux")]
    {
        if let Ok(content) = std::fs::read_to_string("/proc/self/statm") {
            if let Some(rss) = content.split_whitespace().nth(1) {
                if let Ok(pages) = rss.parse::<u64>() {
                    // Page size is typically 4KB
                    return Some(pages * 4096);
                }
            }
        }
    }

    None
}
