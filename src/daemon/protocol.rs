//! RPC Method Protocol
//!
//! Typed requests and responses for the methods the daemon serves. On the
//! wire a call is `method` plus positional `params`; this module validates
//! arity and types and converts results back into plain values.
//!
//! | method           | params              | result                                  |
//! |------------------|---------------------|-----------------------------------------|
//! | `search`         | `[queries, k]`      | `{distances, indices}`                  |
//! | `add_vectors`    | `[vectors]`         | `{message, status: queued|no_change}`   |
//! | `trigger_update` | `[]`                | `{message, status: processing}`         |
//! | `stats`          | `[]`                | [`DaemonStats`]                         |
//! | `ping`           | `[]`                | `"pong"`                                |

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::index_manager::{IndexError, IndexStats};
use crate::rpc::{ErrorCode, ResponseError};
use crate::types::SearchResults;

/// Method names
pub mod methods {
    pub const SEARCH: &str = "search";
    pub const ADD_VECTORS: &str = "add_vectors";
    pub const TRIGGER_UPDATE: &str = "trigger_update";
    pub const STATS: &str = "stats";
    pub const PING: &str = "ping";
}

/// Request types sent from client to daemon
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// k-nearest-neighbor search for each query vector
    Search { queries: Vec<Vec<f32>>, k: usize },

    /// Queue vectors for the next rebuild
    AddVectors { vectors: Vec<Vec<f32>> },

    /// Start a background rebuild
    TriggerUpdate,

    /// Get index statistics
    Stats,

    /// Check if daemon is running
    Ping,
}

impl Request {
    pub fn method(&self) -> &'static str {
        match self {
            Self::Search { .. } => methods::SEARCH,
            Self::AddVectors { .. } => methods::ADD_VECTORS,
            Self::TriggerUpdate => methods::TRIGGER_UPDATE,
            Self::Stats => methods::STATS,
            Self::Ping => methods::PING,
        }
    }

    /// Validate a wire call into a typed request
    pub fn from_call(method: &str, params: Vec<Value>) -> Result<Self, ResponseError> {
        match method {
            methods::SEARCH => {
                let [queries, k] = expect_params::<2>(method, params)?;
                Ok(Self::Search {
                    queries: parse_vectors("queries", queries)?,
                    k: parse_k(k)?,
                })
            }
            methods::ADD_VECTORS => {
                let [vectors] = expect_params::<1>(method, params)?;
                Ok(Self::AddVectors {
                    vectors: parse_vectors("vectors", vectors)?,
                })
            }
            methods::TRIGGER_UPDATE => {
                expect_params::<0>(method, params)?;
                Ok(Self::TriggerUpdate)
            }
            methods::STATS => {
                expect_params::<0>(method, params)?;
                Ok(Self::Stats)
            }
            methods::PING => {
                expect_params::<0>(method, params)?;
                Ok(Self::Ping)
            }
            other => Err(ResponseError::method_not_found(other)),
        }
    }

    /// Positional params for the wire
    pub fn into_params(self) -> Vec<Value> {
        match self {
            Self::Search { queries, k } => vec![vectors_to_value(queries), Value::from(k as u64)],
            Self::AddVectors { vectors } => vec![vectors_to_value(vectors)],
            Self::TriggerUpdate | Self::Stats | Self::Ping => Vec::new(),
        }
    }
}

fn expect_params<const N: usize>(method: &str, params: Vec<Value>) -> Result<[Value; N], ResponseError> {
    let got = params.len();
    params.try_into().map_err(|_| {
        ResponseError::invalid_params(format!("{} expects {} params, got {}", method, N, got))
    })
}

fn parse_vectors(name: &str, value: Value) -> Result<Vec<Vec<f32>>, ResponseError> {
    serde_json::from_value(value).map_err(|e| {
        ResponseError::invalid_params(format!("{} must be a list of float vectors: {}", name, e))
    })
}

fn parse_k(value: Value) -> Result<usize, ResponseError> {
    match value.as_u64().map(usize::try_from) {
        Some(Ok(k)) if k >= 1 => Ok(k),
        _ => Err(ResponseError::invalid_params(format!(
            "k must be a positive integer, got {}",
            value
        ))),
    }
}

fn vectors_to_value(vectors: Vec<Vec<f32>>) -> Value {
    Value::Array(
        vectors
            .into_iter()
            .map(|v| Value::Array(v.into_iter().map(|x| Value::from(x as f64)).collect()))
            .collect(),
    )
}

/// Outcome reported by `add_vectors` and `trigger_update`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateState {
    Queued,
    NoChange,
    Processing,
}

/// Body of an `add_vectors` / `trigger_update` result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateStatus {
    pub message: String,
    pub status: UpdateState,
}

impl UpdateStatus {
    pub fn new(status: UpdateState, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status,
        }
    }
}

/// Result of the `stats` method
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonStats {
    #[serde(flatten)]
    pub index: IndexStats,
    pub uptime_seconds: u64,
}

/// Response types sent from daemon to client
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// Columnar search results
    SearchResults(SearchResults),

    /// Acknowledgment of an update request
    Update(UpdateStatus),

    /// Index statistics
    Stats(DaemonStats),

    /// Ping response
    Pong,
}

impl Response {
    /// Plain value for the result field of a response frame
    pub fn into_value(self) -> Result<Value, ResponseError> {
        let value = match self {
            Self::SearchResults(results) => serde_json::to_value(results),
            Self::Update(status) => serde_json::to_value(status),
            Self::Stats(stats) => serde_json::to_value(stats),
            Self::Pong => Ok(Value::from("pong")),
        };
        value.map_err(|e| ResponseError::internal(format!("Failed to encode result: {}", e)))
    }
}

impl From<IndexError> for ResponseError {
    fn from(err: IndexError) -> Self {
        let code = match &err {
            IndexError::NotReady => ErrorCode::IndexNotReady,
            IndexError::DimensionMismatch(_) | IndexError::InvalidK { .. } => ErrorCode::InvalidParams,
            IndexError::RebuildFailed(_) | IndexError::RebuildInProgress => ErrorCode::RebuildFailed,
            IndexError::QueueFull { .. } => ErrorCode::QueueFull,
            IndexError::Search(_) => ErrorCode::SearchFailed,
        };
        ResponseError::new(code, err.to_string())
    }
}
