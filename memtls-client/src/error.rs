//! # Client Errors
//!
//! Transport-fatal and caller-visible failures. Server-reported statuses
//! (not found, exists, too big) are never errors; they arrive as
//! [`memtls_common::OperationStatus`] values.

use std::io;

use memtls_common::{KeyError, OperationStatus, ProtocolError};
use thiserror::Error;

use crate::transport::{EngineStatus, HandshakeStatus};

/// Result type for the sync client.
pub type ClientResult<T> = Result<T, ClientError>;

/// Failures raised by the TLS transport.
#[derive(Debug, Error)]
pub enum TlsError {
    /// Underlying socket I/O failed.
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
    /// The TLS library rejected the peer's data or its own state.
    #[error("tls engine error: {0}")]
    Engine(#[from] rustls::Error),
    /// The configured server name is not a valid DNS name or IP address.
    #[error("invalid tls server name: {0}")]
    InvalidServerName(String),
    /// The handshake loop ran past its deadline.
    #[error("timeout during tls handshake")]
    HandshakeTimeout,
    /// The session was closed; no further records can flow.
    #[error("tls connection is closed")]
    Closed,
    /// Wrap reported an underflow, which sized buffers can never cause.
    #[error("buffer underflow after wrap")]
    WrapUnderflow,
    /// The handshake loop saw a status it has no transition for.
    #[error("invalid handshake status: {0:?}")]
    InvalidHandshakeStatus(HandshakeStatus),
    /// A record operation returned a status outside its contract.
    #[error("invalid result status after {op}: {status:?}")]
    UnexpectedStatus {
        op: &'static str,
        status: EngineStatus,
    },
}

impl TlsError {
    /// True for errors after which the connection must be discarded.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, TlsError::HandshakeTimeout)
    }
}

/// Errors surfaced by the connection and the client facade.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Tls(#[from] TlsError),
    /// The handshake ended without reaching the finished state.
    #[error("tls handshake failed")]
    HandshakeFailed,
    /// Response bytes did not follow the wire grammar.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    /// No response within the operation timeout. Not retried.
    #[error("operation timed out")]
    OperationTimeout,
    /// The peer closed the stream.
    #[error("connection closed by peer")]
    ConnectionClosed,
    /// A previous transport-fatal error left the connection unusable.
    #[error("connection is broken")]
    Broken,
    /// The configured wire protocol cannot express this operation.
    #[error("{0} is not supported by the configured protocol")]
    Unsupported(&'static str),
    #[error("invalid key: {0}")]
    InvalidKey(#[from] KeyError),
    /// The operation's result slot was dropped before completion.
    #[error("operation result was dropped")]
    ResultDropped,
    /// The server answered with a failure status for a command whose result
    /// type has no slot for it.
    #[error("server rejected {op}: {status}")]
    Rejected {
        op: &'static str,
        status: OperationStatus,
    },
    /// Pool is at capacity and no idle connections are available.
    #[error("connection pool exhausted")]
    PoolExhausted,
    #[error("invalid address")]
    InvalidAddress,
    #[error("invalid configuration: {0}")]
    Config(#[from] memtls_common::ConfigError),
}
