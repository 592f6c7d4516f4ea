//! Configuration for vindex

mod daemon;
mod index;
mod logging;

pub use daemon::{HttpConfig, RpcConfig};
pub use index::{IndexConfig, IndexKind, RebuildConfig, DEFAULT_MAX_K};
pub use logging::{LogFormat, LogLevel, LoggingConfig};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;

/// Largest supported vector dimension
pub const MAX_DIMENSIONS: usize = 65_536;

/// Main configuration for a vindex server
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Vector index configuration
    pub index: IndexConfig,
    /// Background rebuild configuration
    pub rebuild: RebuildConfig,
    /// Framed RPC server configuration
    pub rpc: RpcConfig,
    /// HTTP API server configuration
    pub http: HttpConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file and validate it.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config file '{}': {}", path.display(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Render as TOML (used by `vindex init`)
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validate all configuration fields.
    ///
    /// Collects every error and reports them together.
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        // Index validation
        if self.index.dimensions == 0 {
            errors.push("index dimensions must be positive".to_string());
        }
        if self.index.dimensions > MAX_DIMENSIONS {
            errors.push(format!("index dimensions must be <= {}", MAX_DIMENSIONS));
        }
        if self.index.default_k == 0 {
            errors.push("default_k must be positive".to_string());
        }
        if self.index.max_k == 0 {
            errors.push("max_k must be positive".to_string());
        }
        if self.index.default_k > self.index.max_k {
            errors.push(format!(
                "default_k ({}) must not exceed max_k ({})",
                self.index.default_k, self.index.max_k
            ));
        }
        if self.index.hnsw_m == 0 {
            errors.push("HNSW M parameter must be positive".to_string());
        }
        if self.index.hnsw_ef_construction == 0 {
            errors.push("ef_construction must be positive".to_string());
        }
        if self.index.hnsw_ef_search == 0 {
            errors.push("ef_search must be positive".to_string());
        }

        // Rebuild validation
        if self.rebuild.max_pending_vectors == 0 {
            errors.push("max_pending_vectors must be positive".to_string());
        }

        // RPC validation
        if self.rpc.max_frame_bytes < 16 {
            errors.push("max_frame_bytes must be at least 16".to_string());
        }
        if self.rpc.max_frame_bytes > u32::MAX as usize {
            errors.push("max_frame_bytes must fit in a 32-bit length prefix".to_string());
        }
        if let Err(msg) = check_listen_addr("rpc", &self.rpc.listen_addr) {
            errors.push(msg);
        }

        // HTTP validation
        if self.http.enabled {
            if let Err(msg) = check_listen_addr("http", &self.http.listen_addr) {
                errors.push(msg);
            }
            // Port 0 asks the OS for a fresh port per listener
            let rpc = self.rpc.listen_addr.parse::<SocketAddr>();
            let http = self.http.listen_addr.parse::<SocketAddr>();
            if let (Ok(rpc), Ok(http)) = (rpc, http) {
                if rpc == http && rpc.port() != 0 {
                    errors.push("http and rpc listen addresses must differ".to_string());
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            anyhow::bail!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            );
        }
    }
}

fn check_listen_addr(section: &str, addr: &str) -> std::result::Result<(), String> {
    addr.parse::<SocketAddr>()
        .map(|_| ())
        .map_err(|e| format!("{} listen_addr '{}' is invalid: {}", section, addr, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        Config::default()
    }

    #[test]
    fn default_config_passes_validation() {
        let cfg = valid_config();
        assert!(cfg.validate().is_ok(), "default config should be valid");
    }

    #[test]
    fn validate_rejects_zero_dimensions() {
        let mut cfg = valid_config();
        cfg.index.dimensions = 0;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("index dimensions must be positive"));
    }

    #[test]
    fn validate_rejects_oversized_dimensions() {
        let mut cfg = valid_config();
        cfg.index.dimensions = MAX_DIMENSIONS + 1;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("index dimensions must be <="));
    }

    #[test]
    fn validate_rejects_bad_rpc_addr() {
        let mut cfg = valid_config();
        cfg.rpc.listen_addr = "not-an-addr".to_string();
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("rpc listen_addr"));
    }

    #[test]
    fn validate_skips_http_addr_when_disabled() {
        let mut cfg = valid_config();
        cfg.http.enabled = false;
        cfg.http.listen_addr = "garbage".to_string();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validate_rejects_shared_listen_addr() {
        let mut cfg = valid_config();
        cfg.http.enabled = true;
        cfg.http.listen_addr = cfg.rpc.listen_addr.clone();
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("must differ"));
    }

    #[test]
    fn validate_allows_shared_ephemeral_addr() {
        let mut cfg = valid_config();
        cfg.rpc.listen_addr = "127.0.0.1:0".to_string();
        cfg.http.enabled = true;
        cfg.http.listen_addr = "127.0.0.1:0".to_string();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validate_rejects_default_k_above_max_k() {
        let mut cfg = valid_config();
        cfg.index.max_k = 5;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("must not exceed max_k"));
    }

    #[test]
    fn validate_collects_multiple_errors() {
        let mut cfg = valid_config();
        cfg.index.dimensions = 0;
        cfg.index.default_k = 0;
        cfg.rebuild.max_pending_vectors = 0;
        let msg = cfg.validate().unwrap_err().to_string();
        assert!(msg.contains("index dimensions must be positive"));
        assert!(msg.contains("default_k must be positive"));
        assert!(msg.contains("max_pending_vectors must be positive"));
    }

    #[test]
    fn default_values() {
        let cfg = valid_config();
        assert_eq!(cfg.index.dimensions, 1000);
        assert_eq!(cfg.index.kind, IndexKind::Flat);
        assert_eq!(cfg.rebuild.interval_secs, 7200);
        assert!(cfg.rebuild.on_startup);
        assert!(!cfg.rebuild.requeue_on_failure);
        assert_eq!(cfg.rpc.listen_addr, "127.0.0.1:8000");
        assert!(!cfg.http.enabled);
    }

    #[test]
    fn load_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vindex.toml");
        std::fs::write(
            &path,
            "[index]\ndimensions = 8\nkind = \"flat\"\n\n[rebuild]\ninterval_secs = 0\n",
        )
        .unwrap();

        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.index.dimensions, 8);
        assert_eq!(cfg.rebuild.interval_secs, 0);
        assert_eq!(cfg.index.default_k, 10);
    }

    #[test]
    fn load_rejects_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vindex.toml");
        std::fs::write(&path, "[index]\ndimensions = 0\n").unwrap();
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn toml_roundtrip_of_defaults() {
        let rendered = Config::default().to_toml().unwrap();
        let parsed: Config = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.index.dimensions, 1000);
        assert_eq!(parsed.rpc.max_frame_bytes, crate::rpc::codec::MAX_FRAME_SIZE);
    }
}
