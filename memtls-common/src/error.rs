//! # Shared Errors
//!
//! Errors raised while decoding wire frames, validating keys, or loading
//! configuration. Server-reported statuses are not errors; see
//! [`crate::status::StatusCode`].

use thiserror::Error;

/// Result alias for protocol-level decoding.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Malformed or unexpected bytes on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Binary header carried an unknown magic byte.
    #[error("invalid magic byte 0x{0:02x}")]
    InvalidMagic(u8),
    /// Header lengths do not add up to the declared body length.
    #[error("inconsistent frame lengths")]
    InvalidLength,
    /// A text response line could not be interpreted.
    #[error("unexpected response line: {0}")]
    UnexpectedLine(String),
    /// A numeric field could not be parsed.
    #[error("invalid number in response")]
    InvalidNumber,
    /// Response opcode does not belong to the pending operation.
    #[error("unexpected opcode 0x{0:02x}")]
    UnexpectedOpcode(u8),
}

/// Key rejected before any bytes are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("key is empty")]
    Empty,
    #[error("key exceeds {max} bytes", max = crate::types::MAX_KEY_SIZE)]
    TooLong,
    /// Whitespace and control bytes break the text protocol framing.
    #[error("key contains whitespace or control characters")]
    InvalidByte,
}

/// Configuration could not be loaded or failed validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{field} must be greater than zero")]
    ZeroDuration { field: &'static str },
    #[error("tls is enabled but no server name was configured")]
    MissingServerName,
    #[error("{0}")]
    Invalid(String),
}
