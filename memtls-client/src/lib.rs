//! # memtls Sync Client
//!
//! Purpose: Talk the memcached binary or text protocol to a cache node over a
//! non-blocking socket, optionally wrapped in TLS driven by hand.
//!
//! ## Design Principles
//! 1. **Explicit Buffers**: The TLS transport owns four growable record
//!    buffers and never aliases them.
//! 2. **Pure Transitions**: Handshake steps and operation states advance
//!    through transition functions that are tested in isolation.
//! 3. **Engine Agnostic**: Any [`TlsEngine`] drives the transport; rustls is
//!    the shipped implementation.
//! 4. **Report, Don't Decide**: Connection failures go to a
//!    [`FailureHandler`]; the core never retries on its own.

mod client;
mod connection;
mod error;
mod failure;
pub mod ops;
mod pool;
pub mod transport;

pub use client::{CacheClient, ClientConfig};
pub use connection::{Connection, Transport};
pub use error::{ClientError, ClientResult, TlsError};
pub use failure::{FailureAction, FailureHandler, ModeFailureHandler, NodeFailure};
pub use ops::{CancelHandle, Operation, OperationHandle, OperationState, Outcome, Payload, Request};
pub use pool::{ConnectionPool, PoolConfig, PooledConnection};
pub use transport::{client_config, load_roots, RustlsEngine, TlsEngine, TlsTransport};
