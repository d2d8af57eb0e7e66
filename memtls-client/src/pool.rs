//! # Connection Pool
//!
//! Purpose: Reuse node connections so the TCP connect and TLS handshake are
//! paid once rather than per call.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Keep a bounded set of reusable connections.
//! 2. **Minimal Locking**: Hold the mutex only while moving idle connections.
//! 3. **Fail Fast**: Exceeding the pool limit returns an error immediately.
//! 4. **Broken Stays Out**: A connection that failed or timed out is never
//!    handed out again; a discarded node refuses new connections.

use std::collections::VecDeque;
use std::sync::Arc;

use memtls_common::ConnectionConfig;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::connection::Connection;
use crate::error::{ClientError, ClientResult};
use crate::failure::{FailureAction, FailureHandler};
use crate::ops::{Operation, Outcome, Request};

/// Pool configuration for one node.
#[derive(Clone)]
pub struct PoolConfig {
    /// Node address, e.g. "127.0.0.1:11211".
    pub addr: String,
    /// Maximum number of idle connections to keep.
    pub max_idle: usize,
    /// Maximum total connections (idle + in-use).
    pub max_total: usize,
    pub connection: ConnectionConfig,
    pub tls: Option<Arc<rustls::ClientConfig>>,
    pub failure: Arc<dyn FailureHandler>,
}

struct PoolState {
    idle: VecDeque<Connection>,
    total: usize,
    discarded: bool,
}

struct PoolInner {
    config: PoolConfig,
    state: Mutex<PoolState>,
}

/// Connection pool handle.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    pub fn new(config: PoolConfig) -> ClientResult<Self> {
        config.connection.validate()?;
        let state = PoolState {
            idle: VecDeque::with_capacity(config.max_idle),
            total: 0,
            discarded: false,
        };
        Ok(ConnectionPool {
            inner: Arc::new(PoolInner {
                config,
                state: Mutex::new(state),
            }),
        })
    }

    pub fn addr(&self) -> &str {
        &self.inner.config.addr
    }

    pub fn protocol(&self) -> memtls_common::WireProtocol {
        self.inner.config.connection.protocol
    }

    /// True once the failure handler asked to stop using this node.
    pub fn is_discarded(&self) -> bool {
        self.inner.state.lock().discarded
    }

    /// Acquires a connection, opening a new one when none is idle.
    pub fn acquire(&self) -> ClientResult<PooledConnection> {
        if let Some(conn) = self.pop_idle()? {
            return Ok(PooledConnection::new(self.inner.clone(), conn));
        }

        if !self.try_reserve() {
            return Err(ClientError::PoolExhausted);
        }

        let config = &self.inner.config;
        match Connection::connect(
            &config.addr,
            &config.connection,
            config.tls.clone(),
            config.failure.clone(),
        ) {
            Ok(conn) => Ok(PooledConnection::new(self.inner.clone(), conn)),
            Err(err) => {
                warn!(node = %config.addr, %err, "connect failed");
                self.release_slot();
                Err(err)
            }
        }
    }

    fn pop_idle(&self) -> ClientResult<Option<Connection>> {
        let mut state = self.inner.state.lock();
        if state.discarded {
            return Err(ClientError::Broken);
        }
        Ok(state.idle.pop_front())
    }

    fn try_reserve(&self) -> bool {
        let mut state = self.inner.state.lock();
        if state.total >= self.inner.config.max_total {
            return false;
        }
        state.total += 1;
        true
    }

    fn release_slot(&self) {
        let mut state = self.inner.state.lock();
        state.total = state.total.saturating_sub(1);
    }

    fn return_connection(&self, conn: Connection) {
        let mut state = self.inner.state.lock();
        if !state.discarded && state.idle.len() < self.inner.config.max_idle {
            state.idle.push_back(conn);
        } else {
            state.total = state.total.saturating_sub(1);
        }
    }

    fn discard(&self) {
        let idle: Vec<Connection> = {
            let mut state = self.inner.state.lock();
            state.discarded = true;
            let drained: Vec<Connection> = state.idle.drain(..).collect();
            state.total = state.total.saturating_sub(drained.len());
            drained
        };
        for mut conn in idle {
            if let Err(err) = conn.close() {
                debug!(%err, "closing idle connection failed");
            }
        }
    }
}

/// RAII wrapper returning a connection to the pool on drop.
pub struct PooledConnection {
    pool: Arc<PoolInner>,
    conn: Option<Connection>,
}

impl PooledConnection {
    fn new(pool: Arc<PoolInner>, conn: Connection) -> Self {
        PooledConnection {
            pool,
            conn: Some(conn),
        }
    }

    /// Runs one operation to a terminal state.
    pub fn run(&mut self, op: &mut Operation) -> ClientResult<()> {
        match self.conn.as_mut() {
            Some(conn) => conn.run(op),
            None => Err(ClientError::Broken),
        }
    }

    pub fn execute(&mut self, request: Request) -> ClientResult<Outcome> {
        match self.conn.as_mut() {
            Some(conn) => conn.execute(request),
            None => Err(ClientError::Broken),
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let mut conn = match self.conn.take() {
            Some(conn) => conn,
            None => return,
        };

        let pool = ConnectionPool {
            inner: self.pool.clone(),
        };

        match conn.broken() {
            None => pool.return_connection(conn),
            Some(action) => {
                // Broken connections were already closed or are about to be.
                if let Err(err) = conn.close() {
                    debug!(%err, "closing broken connection failed");
                }
                pool.release_slot();
                if action == FailureAction::Discard {
                    warn!(node = %pool.addr(), "node discarded after failure");
                    pool.discard();
                }
            }
        }
    }
}
