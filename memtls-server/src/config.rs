//! # Server Configuration
//!
//! JSON-loadable settings for the reference node. Every field has a default,
//! so an empty document (or no file at all) yields a plaintext node on
//! `127.0.0.1:11211`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use memtls_engine::{EngineConfig, DEFAULT_MAX_ITEM_SIZE};
use serde::Deserialize;

use crate::error::{ServerError, ServerResult};

/// PEM files backing the node's TLS identity.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TlsFiles {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    /// Largest value the node stores; bigger ones answer "too large".
    pub max_item_size: usize,
    /// Engine shard count; `None` sizes from the CPU count.
    pub shards: Option<usize>,
    /// Serve TLS instead of plaintext.
    pub tls: Option<TlsFiles>,
    pub expiry_sweep_ms: u64,
    /// Reported by the `version` command.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            listen_addr: "127.0.0.1:11211".to_string(),
            max_item_size: DEFAULT_MAX_ITEM_SIZE,
            shards: None,
            tls: None,
            expiry_sweep_ms: 1_000,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    pub fn from_json(text: &str) -> ServerResult<Self> {
        let config: ServerConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> ServerResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn validate(&self) -> ServerResult<()> {
        if self.max_item_size == 0 {
            return Err(ServerError::Config("max_item_size must be greater than zero".into()));
        }
        if self.shards == Some(0) {
            return Err(ServerError::Config("shards must be greater than zero".into()));
        }
        if self.version.chars().any(|c| c.is_ascii_control()) {
            return Err(ServerError::Config("version must be a single line".into()));
        }
        Ok(())
    }

    pub fn engine_config(&self) -> EngineConfig {
        let defaults = EngineConfig::default();
        EngineConfig {
            shards: self.shards.unwrap_or(defaults.shards),
            max_item_size: self.max_item_size,
        }
    }

    pub fn expiry_sweep(&self) -> Duration {
        Duration::from_millis(self.expiry_sweep_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = ServerConfig::from_json("{}").unwrap();
        assert_eq!(config, ServerConfig::default());
        assert!(config.tls.is_none());
    }

    #[test]
    fn tls_paths_are_read() {
        let config = ServerConfig::from_json(
            r#"{ "listen_addr": "0.0.0.0:11212",
                 "tls": { "cert_path": "node.crt", "key_path": "node.key" } }"#,
        )
        .unwrap();
        let tls = config.tls.unwrap();
        assert_eq!(tls.cert_path, PathBuf::from("node.crt"));
        assert_eq!(tls.key_path, PathBuf::from("node.key"));
    }

    #[test]
    fn zero_item_size_is_rejected() {
        let err = ServerConfig::from_json(r#"{ "max_item_size": 0 }"#).unwrap_err();
        assert!(matches!(err, ServerError::Config(_)));
    }
}
