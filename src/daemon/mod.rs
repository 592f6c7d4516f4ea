//! Daemon Module
//!
//! The daemon owns the active vector index and serves it over framed RPC
//! and, optionally, HTTP.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        vindex daemon                         │
//! │                                                              │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────────┐  │
//! │  │ RPC server   │   │ HTTP server  │   │ Rebuild timer    │  │
//! │  │ (TCP frames) │   │ (axum)       │   │                  │  │
//! │  └──────┬───────┘   └──────┬───────┘   └────────┬─────────┘  │
//! │         └────────┬─────────┘                    │            │
//! │          ┌───────┴────────┐                     │            │
//! │          │ RequestHandler │                     │            │
//! │          └───────┬────────┘                     │            │
//! │  ┌───────────────┴──────────────────────────────┴─────────┐  │
//! │  │                     Index Manager                       │  │
//! │  │  ┌──────────────┐  drain  ┌─────────┐  swap  ┌───────┐  │  │
//! │  │  │ Ingest queue │ ──────▶ │ Builder │ ─────▶ │Active │  │  │
//! │  │  └──────────────┘         └─────────┘        └───────┘  │  │
//! │  └─────────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```bash
//! vindex serve --config vindex.toml
//! ```

pub mod handler;
pub mod http;
pub mod index_manager;
pub mod ingest;
pub mod lifecycle;
pub mod metrics;
pub mod protocol;
pub mod server;

pub use handler::RequestHandler;
pub use http::HttpServer;
pub use index_manager::{IndexError, IndexManager, IndexStats, RebuildReport, TriggerOutcome};
pub use ingest::IngestQueue;
pub use lifecycle::Daemon;
pub use metrics::{DaemonMetrics, MetricsSnapshot, Timer};
pub use protocol::{DaemonStats, Request, Response, UpdateState, UpdateStatus};
pub use server::RpcServer;
