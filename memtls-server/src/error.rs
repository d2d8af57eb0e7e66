//! Errors raised while configuring or running the reference node.

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid server configuration: {0}")]
    Config(String),
    #[error("invalid configuration json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("tls error: {0}")]
    Tls(#[from] rustls::Error),
    /// Certificate or key file could not be read as PEM.
    #[error("cannot load {path}: {reason}")]
    Pem { path: String, reason: String },
}

pub type ServerResult<T> = Result<T, ServerError>;
