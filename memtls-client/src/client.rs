//! # Synchronous Client API
//!
//! Purpose: Expose a compact, blocking API over the binary or text cache
//! protocol, with optional TLS on the wire.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `CacheClient` hides pooling, framing and TLS.
//! 2. **Borrow-Friendly API**: Accept `&[u8]` keys and values.
//! 3. **Statuses Are Values**: store commands return the decoded
//!    [`OperationStatus`]; only transport failures are errors.
//! 4. **One Protocol Per Client**: the configured wire protocol decides the
//!    encoding; commands it cannot express fail with `Unsupported`.

use std::sync::Arc;

use bytes::Bytes;
use memtls_common::{
    CasResponse, CasValue, ConnectionConfig, Key, OperationStatus, StatusCode, WireProtocol,
};
use tracing::debug;

use crate::error::{ClientError, ClientResult};
use crate::failure::{FailureHandler, ModeFailureHandler};
use crate::ops::{
    binary, text, Mutator, Operation, OperationHandle, Outcome, Payload, Request, StoreType,
};
use crate::pool::{ConnectionPool, PoolConfig};

/// Configuration for the client and its pool.
#[derive(Clone)]
pub struct ClientConfig {
    /// Node address, e.g. "127.0.0.1:11211".
    pub addr: String,
    pub connection: ConnectionConfig,
    /// Maximum idle connections kept in the pool.
    pub max_idle: usize,
    /// Maximum total connections (idle + in-use).
    pub max_total: usize,
    /// Trust roots and protocol settings; required when `connection.tls` is set.
    pub tls: Option<Arc<rustls::ClientConfig>>,
    pub failure: Arc<dyn FailureHandler>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            addr: "127.0.0.1:11211".to_string(),
            connection: ConnectionConfig::default(),
            max_idle: 1,
            max_total: 4,
            tls: None,
            failure: Arc::new(ModeFailureHandler),
        }
    }
}

/// Synchronous cache client.
///
/// Each call acquires a connection, runs one operation and returns the
/// connection to the pool.
pub struct CacheClient {
    pool: ConnectionPool,
    protocol: WireProtocol,
}

impl CacheClient {
    /// Creates a plaintext binary-protocol client with default settings.
    pub fn connect(addr: impl Into<String>) -> ClientResult<Self> {
        let config = ClientConfig {
            addr: addr.into(),
            ..ClientConfig::default()
        };
        Self::with_config(config)
    }

    pub fn with_config(config: ClientConfig) -> ClientResult<Self> {
        let protocol = config.connection.protocol;
        let pool = ConnectionPool::new(PoolConfig {
            addr: config.addr,
            max_idle: config.max_idle,
            max_total: config.max_total,
            connection: config.connection,
            tls: config.tls,
            failure: config.failure,
        })?;
        Ok(CacheClient { pool, protocol })
    }

    pub fn protocol(&self) -> WireProtocol {
        self.protocol
    }

    /// Runs a prebuilt request and returns its full outcome.
    pub fn execute(&self, request: Request) -> ClientResult<Outcome> {
        let mut conn = self.pool.acquire()?;
        conn.execute(request)
    }

    /// Runs a request whose cancel handle was handed out beforehand.
    ///
    /// The closure receives the result handle before any byte is written, so
    /// another thread can cancel through [`OperationHandle::cancel_handle`].
    pub fn submit<F>(&self, request: Request, on_start: F) -> ClientResult<()>
    where
        F: FnOnce(OperationHandle),
    {
        let (mut op, handle) = Operation::new(request);
        on_start(handle);
        let mut conn = self.pool.acquire()?;
        conn.run(&mut op)
    }

    /// Fetches a value. `Ok(None)` when the key is missing.
    pub fn get(&self, key: &[u8]) -> ClientResult<Option<Bytes>> {
        let key = Key::new(key)?;
        let request = match self.protocol {
            WireProtocol::Binary => binary::get(&key),
            WireProtocol::Text => text::get(&key),
        };
        Ok(self.fetch("get", request)?.map(|(_, data)| data))
    }

    /// Fetches a value together with its CAS token.
    pub fn gets(&self, key: &[u8]) -> ClientResult<Option<CasValue>> {
        let key = Key::new(key)?;
        let request = match self.protocol {
            WireProtocol::Binary => binary::gets(&key),
            WireProtocol::Text => text::gets(&key),
        };
        Ok(self
            .fetch("gets", request)?
            .map(|(cas, value)| CasValue { cas, value }))
    }

    pub fn set(
        &self,
        key: &[u8],
        flags: u32,
        exptime: u32,
        value: &[u8],
    ) -> ClientResult<OperationStatus> {
        self.store(StoreType::Set, key, flags, exptime, value)
    }

    /// Stores only when the key is absent; otherwise `ERR_EXISTS`.
    pub fn add(
        &self,
        key: &[u8],
        flags: u32,
        exptime: u32,
        value: &[u8],
    ) -> ClientResult<OperationStatus> {
        self.store(StoreType::Add, key, flags, exptime, value)
    }

    /// Stores only when the key is present.
    pub fn replace(
        &self,
        key: &[u8],
        flags: u32,
        exptime: u32,
        value: &[u8],
    ) -> ClientResult<OperationStatus> {
        self.store(StoreType::Replace, key, flags, exptime, value)
    }

    /// Appends to the stored value. A non-zero `cas` must match.
    pub fn append(&self, cas: u64, key: &[u8], value: &[u8]) -> ClientResult<OperationStatus> {
        self.concat(StoreType::Append, cas, key, value)
    }

    /// Prepends to the stored value. A non-zero `cas` must match.
    pub fn prepend(&self, cas: u64, key: &[u8], value: &[u8]) -> ClientResult<OperationStatus> {
        self.concat(StoreType::Prepend, cas, key, value)
    }

    /// Compare-and-swap store.
    pub fn cas(
        &self,
        key: &[u8],
        cas: u64,
        flags: u32,
        exptime: u32,
        value: &[u8],
    ) -> ClientResult<CasResponse> {
        let key = Key::new(key)?;
        let request = match self.protocol {
            WireProtocol::Binary => binary::cas(&key, cas, flags, exptime, value),
            WireProtocol::Text => text::cas(&key, cas, flags, exptime, value),
        };
        let outcome = self.execute(request)?;
        Ok(CasResponse::from(outcome.status.code()))
    }

    /// Deletes a key. A non-zero `cas` must match the stored item.
    pub fn delete(&self, key: &[u8], cas: u64) -> ClientResult<OperationStatus> {
        let key = Key::new(key)?;
        let request = match self.protocol {
            WireProtocol::Binary => binary::delete(&key, cas),
            WireProtocol::Text if cas != 0 => {
                return Err(ClientError::Unsupported("delete with cas"))
            }
            WireProtocol::Text => text::delete(&key),
        };
        Ok(self.execute(request)?.status)
    }

    /// Increments a counter. With `initial` set, a missing key is created at
    /// `initial`; otherwise a miss returns `Ok(None)`.
    pub fn incr(
        &self,
        key: &[u8],
        delta: u64,
        initial: Option<u64>,
        exptime: u32,
    ) -> ClientResult<Option<u64>> {
        self.mutate(Mutator::Incr, key, delta, initial, exptime)
    }

    /// Decrements a counter; the server clamps at zero.
    pub fn decr(
        &self,
        key: &[u8],
        delta: u64,
        initial: Option<u64>,
        exptime: u32,
    ) -> ClientResult<Option<u64>> {
        self.mutate(Mutator::Decr, key, delta, initial, exptime)
    }

    pub fn version(&self) -> ClientResult<String> {
        let request = match self.protocol {
            WireProtocol::Binary => binary::version(),
            WireProtocol::Text => text::version(),
        };
        let outcome = self.execute(request)?;
        match outcome.payload {
            Payload::Text(version) if outcome.status.is_success() => Ok(version),
            _ => Err(ClientError::Rejected {
                op: "version",
                status: outcome.status,
            }),
        }
    }

    pub fn noop(&self) -> ClientResult<OperationStatus> {
        match self.protocol {
            WireProtocol::Binary => Ok(self.execute(binary::noop())?.status),
            WireProtocol::Text => Err(ClientError::Unsupported("noop")),
        }
    }

    /// Asks the node to reload its TLS certificate and key.
    pub fn refresh_certs(&self) -> ClientResult<OperationStatus> {
        match self.protocol {
            WireProtocol::Text => Ok(self.execute(text::refresh_certs())?.status),
            WireProtocol::Binary => Err(ClientError::Unsupported("refresh_certs")),
        }
    }

    fn fetch(&self, op: &'static str, request: Request) -> ClientResult<Option<(u64, Bytes)>> {
        let outcome = self.execute(request)?;
        if outcome.status.code() == StatusCode::ErrNotFound {
            return Ok(None);
        }
        match outcome.payload {
            Payload::Value { data, .. } if outcome.status.is_success() => {
                Ok(Some((outcome.cas.unwrap_or(0), data)))
            }
            _ => Err(ClientError::Rejected {
                op,
                status: outcome.status,
            }),
        }
    }

    fn store(
        &self,
        kind: StoreType,
        key: &[u8],
        flags: u32,
        exptime: u32,
        value: &[u8],
    ) -> ClientResult<OperationStatus> {
        let key = Key::new(key)?;
        let request = match self.protocol {
            WireProtocol::Binary => binary::store(kind, &key, flags, exptime, value, 0),
            WireProtocol::Text => text::store(kind, &key, flags, exptime, value),
        };
        Ok(self.execute(request)?.status)
    }

    fn concat(
        &self,
        kind: StoreType,
        cas: u64,
        key: &[u8],
        value: &[u8],
    ) -> ClientResult<OperationStatus> {
        let key = Key::new(key)?;
        let request = match self.protocol {
            WireProtocol::Binary => binary::store(kind, &key, 0, 0, value, cas),
            WireProtocol::Text if cas != 0 => {
                return Err(ClientError::Unsupported(match kind {
                    StoreType::Prepend => "prepend with cas",
                    _ => "append with cas",
                }))
            }
            WireProtocol::Text => text::store(kind, &key, 0, 0, value),
        };
        Ok(self.execute(request)?.status)
    }

    fn mutate(
        &self,
        mutator: Mutator,
        key: &[u8],
        delta: u64,
        initial: Option<u64>,
        exptime: u32,
    ) -> ClientResult<Option<u64>> {
        let key = Key::new(key)?;
        match self.protocol {
            WireProtocol::Binary => {
                let request = match initial {
                    Some(initial) => binary::mutate(mutator, &key, delta, initial, exptime),
                    None => binary::mutate_existing(mutator, &key, delta),
                };
                counter(self.execute(request)?)
            }
            WireProtocol::Text => {
                let value = counter(self.execute(text::mutate(mutator, &key, delta))?)?;
                let Some(initial) = initial else {
                    return Ok(value);
                };
                if value.is_some() {
                    return Ok(value);
                }
                // The text protocol never creates counters; seed it with add.
                let seed = initial.to_string();
                let add = text::store(StoreType::Add, &key, 0, exptime, seed.as_bytes());
                let added = self.execute(add)?;
                if added.status.is_success() {
                    return Ok(Some(initial));
                }
                debug!(key = %key, status = %added.status, "counter seeded concurrently");
                counter(self.execute(text::mutate(mutator, &key, delta))?)
            }
        }
    }
}

fn counter(outcome: Outcome) -> ClientResult<Option<u64>> {
    match outcome.payload {
        Payload::Counter(value) if outcome.status.is_success() => Ok(Some(value)),
        _ if outcome.status.code() == StatusCode::ErrNotFound => Ok(None),
        _ => Err(ClientError::Rejected {
            op: "counter",
            status: outcome.status,
        }),
    }
}
