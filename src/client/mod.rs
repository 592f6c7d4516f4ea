//! Client Module
//!
//! Typed RPC client used by the CLI commands and integration tests.

pub mod connection;

pub use connection::DaemonClient;

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::daemon::protocol::{DaemonStats, Request, UpdateStatus};
use crate::rpc::ResponseError;
use crate::types::SearchResults;

/// Errors that can occur when communicating with the daemon
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Daemon is not running at {0}. Start it with: vindex serve")]
    DaemonNotRunning(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection closed by daemon")]
    ConnectionClosed,

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Unexpected response from daemon: {0}")]
    UnexpectedResponse(String),

    #[error("Daemon error: {0}")]
    Daemon(ResponseError),
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, ClientError> {
    serde_json::from_value(value).map_err(|e| ClientError::UnexpectedResponse(e.to_string()))
}

impl DaemonClient {
    /// k nearest neighbors for each query
    pub async fn search(&self, queries: Vec<Vec<f32>>, k: usize) -> Result<SearchResults, ClientError> {
        decode(self.send(Request::Search { queries, k }).await?)
    }

    /// Queue vectors for the next index update
    pub async fn add_vectors(&self, vectors: Vec<Vec<f32>>) -> Result<UpdateStatus, ClientError> {
        decode(self.send(Request::AddVectors { vectors }).await?)
    }

    /// Start a background index update
    pub async fn trigger_update(&self) -> Result<UpdateStatus, ClientError> {
        decode(self.send(Request::TriggerUpdate).await?)
    }

    /// Index statistics
    pub async fn stats(&self) -> Result<DaemonStats, ClientError> {
        decode(self.send(Request::Stats).await?)
    }

    /// Ping the daemon to check if it's running
    pub async fn ping(&self) -> Result<bool, ClientError> {
        let reply = self.send(Request::Ping).await?;
        Ok(reply.as_str() == Some("pong"))
    }
}
