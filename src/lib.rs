//! vindex: In-Memory Vector Index with Background Rebuilds
//!
//! Serves k-nearest-neighbor queries against an in-memory index while
//! absorbing new vectors and periodically rebuilding, featuring:
//! - Ingestion queue drained into versioned rebuilds with an atomic swap
//! - Length-prefixed MessagePack RPC with concurrent, correlated calls
//! - Exact flat search, or HNSW via USearch (`hnsw` feature)
//! - Optional JSON / MessagePack HTTP API and Prometheus metrics

pub mod client;
pub mod config;
pub mod daemon;
pub mod index;
pub mod rpc;
pub mod types;

pub use config::Config;
pub use types::*;
