//! RPC and HTTP listener configuration

use serde::{Deserialize, Serialize};

/// Framed RPC server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// Listen address for the RPC server (e.g., "0.0.0.0:8000")
    pub listen_addr: String,
    /// Largest frame payload accepted or sent
    pub max_frame_bytes: usize,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8000".to_string(),
            max_frame_bytes: crate::rpc::codec::MAX_FRAME_SIZE,
        }
    }
}

/// HTTP API server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Enable HTTP API server
    pub enabled: bool,
    /// Listen address for HTTP server (e.g., "0.0.0.0:8080")
    pub listen_addr: String,
    /// Enable CORS (useful for browser-based clients)
    pub cors_enabled: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1:8080".to_string(),
            cors_enabled: false,
        }
    }
}
