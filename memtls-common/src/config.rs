//! # Connection Configuration
//!
//! Pure data consumed by the connection layer: timeouts, the node-failure
//! policy, the wire protocol, and TLS settings. Validation happens here; the
//! transport core only reads the resulting values.

use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// What the connection manager does with operations of a failed node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    /// Move queued operations to the next node.
    #[default]
    Redistribute,
    /// Keep operations queued and retry once the node reconnects.
    Retry,
    /// Cancel every operation queued on the node.
    Cancel,
}

/// Wire encoding spoken on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireProtocol {
    #[default]
    Binary,
    Text,
}

/// Per-connection configuration.
///
/// ```rust
/// use memtls_common::{ConnectionConfig, FailureMode};
///
/// let config = ConnectionConfig::from_json(
///     r#"{ "operation_timeout_ms": 250, "failure_mode": "cancel" }"#,
/// ).expect("valid config");
/// assert_eq!(config.failure_mode, FailureMode::Cancel);
/// assert!(!config.tls);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Upper bound for one request/response exchange.
    pub operation_timeout_ms: u64,
    /// Upper bound for the TLS handshake loop.
    pub handshake_timeout_ms: u64,
    pub failure_mode: FailureMode,
    pub protocol: WireProtocol,
    /// Wrap the socket in TLS.
    pub tls: bool,
    /// SNI / certificate name; required when `tls` is set.
    pub server_name: Option<String>,
    /// Initial capacity of the plaintext read buffer.
    pub read_buffer_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            operation_timeout_ms: 2_500,
            handshake_timeout_ms: 5_000,
            failure_mode: FailureMode::default(),
            protocol: WireProtocol::default(),
            tls: false,
            server_name: None,
            read_buffer_size: 16 * 1024,
        }
    }
}

impl ConnectionConfig {
    /// Parses and validates a JSON document.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: ConnectionConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.operation_timeout_ms == 0 {
            return Err(ConfigError::ZeroDuration {
                field: "operation_timeout_ms",
            });
        }
        if self.handshake_timeout_ms == 0 {
            return Err(ConfigError::ZeroDuration {
                field: "handshake_timeout_ms",
            });
        }
        if self.tls && self.server_name.as_deref().map_or(true, str::is_empty) {
            return Err(ConfigError::MissingServerName);
        }
        if self.read_buffer_size == 0 {
            return Err(ConfigError::Invalid(
                "read_buffer_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    #[inline]
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    #[inline]
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}
