//! HTTP API Server Module
//!
//! JSON and MessagePack REST surface over the same request handler the
//! framed RPC server uses.

pub mod handlers;
pub mod routes;
pub mod server;
pub mod types;

pub use server::HttpServer;
