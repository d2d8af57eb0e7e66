//! # Connection Driver
//!
//! Purpose: Run one operation at a time over one non-blocking socket, plain
//! or TLS, enforcing the operation timeout and reporting fatal failures.
//!
//! ## Design Principles
//! 1. **One In Flight**: `run` drives an operation to a terminal state before
//!    returning; the owner serializes access.
//! 2. **No Silent Retry**: a timed-out operation completes with `TIMEDOUT`
//!    and the connection is flagged for rebuild.
//! 3. **Stream Alignment**: plaintext after a response stays buffered for
//!    the next operation; a cancelled operation still consumes its reply.

use std::io::{self, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use memtls_common::{ConfigError, ConnectionConfig, FailureMode, WireProtocol};
use tracing::{debug, error, info_span, warn, Span};

use crate::error::{ClientError, ClientResult};
use crate::failure::{FailureAction, FailureHandler, NodeFailure};
use crate::ops::{Operation, OperationState, Outcome, Request};
use crate::transport::{
    enlarge, read_socket, Backoff, Encrypted, RecordBuffer, RustlsEngine, Socket, SocketRead,
    TlsEngine, TlsTransport,
};

/// Bytes path under a connection.
pub enum Transport<S, E> {
    Plain(S),
    Tls(TlsTransport<S, E>),
}

/// One node connection.
pub struct Connection<S = TcpStream, E = RustlsEngine> {
    node: String,
    transport: Transport<S, E>,
    protocol: WireProtocol,
    inbound: BytesMut,
    scratch: RecordBuffer,
    outbound: RecordBuffer,
    operation_timeout: Duration,
    failure_mode: FailureMode,
    failure: Arc<dyn FailureHandler>,
    span: Span,
    broken: Option<FailureAction>,
}

impl Connection<TcpStream, RustlsEngine> {
    /// Opens a TCP connection to `addr` and, when `config.tls` is set,
    /// completes the TLS handshake before returning.
    pub fn connect(
        addr: &str,
        config: &ConnectionConfig,
        tls: Option<Arc<rustls::ClientConfig>>,
        failure: Arc<dyn FailureHandler>,
    ) -> ClientResult<Self> {
        config.validate()?;
        let sock_addr = addr
            .to_socket_addrs()?
            .next()
            .ok_or(ClientError::InvalidAddress)?;
        let stream = TcpStream::connect_timeout(&sock_addr, config.handshake_timeout())?;
        // Disable Nagle to keep request latency low for small payloads.
        stream.set_nodelay(true)?;
        stream.set_nonblocking(true)?;

        let span = info_span!("connection", node = %addr, tls = config.tls);
        let transport = if config.tls {
            let tls_config = tls.ok_or_else(|| {
                ConfigError::Invalid("tls is enabled but no client tls config was given".into())
            })?;
            let server_name = config
                .server_name
                .as_deref()
                .ok_or(ConfigError::MissingServerName)?;
            let engine = RustlsEngine::client(tls_config, server_name)?;
            let mut tls = TlsTransport::new(stream, engine, span.clone());
            if !tls.handshake(config.handshake_timeout())? {
                return Err(ClientError::HandshakeFailed);
            }
            Transport::Tls(tls)
        } else {
            Transport::Plain(stream)
        };
        Ok(Connection::new(addr, transport, config, failure, span))
    }
}

impl<S: Socket, E: TlsEngine> Connection<S, E> {
    pub fn new(
        node: impl Into<String>,
        transport: Transport<S, E>,
        config: &ConnectionConfig,
        failure: Arc<dyn FailureHandler>,
        span: Span,
    ) -> Self {
        let packet = match &transport {
            Transport::Tls(tls) => tls.session().packet_buffer_size,
            Transport::Plain(_) => 0,
        };
        Connection {
            node: node.into(),
            transport,
            protocol: config.protocol,
            inbound: BytesMut::with_capacity(config.read_buffer_size),
            scratch: RecordBuffer::with_capacity(config.read_buffer_size),
            outbound: RecordBuffer::with_capacity(packet),
            operation_timeout: config.operation_timeout(),
            failure_mode: config.failure_mode,
            failure,
            span,
            broken: None,
        }
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn protocol(&self) -> WireProtocol {
        self.protocol
    }

    pub fn is_tls(&self) -> bool {
        matches!(self.transport, Transport::Tls(_))
    }

    /// Set once the connection can no longer be used; says what the failure
    /// handler asked for.
    pub fn broken(&self) -> Option<FailureAction> {
        self.broken
    }

    /// Encodes, runs and returns the outcome of one request.
    pub fn execute(&mut self, request: Request) -> ClientResult<Outcome> {
        let (mut op, handle) = Operation::new(request);
        self.run(&mut op)?;
        handle.outcome()
    }

    /// Drives `op` to a terminal state.
    pub fn run(&mut self, op: &mut Operation) -> ClientResult<()> {
        let _entered = self.span.clone().entered();
        if self.broken.is_some() {
            op.cancel();
            return Err(ClientError::Broken);
        }
        let deadline = Instant::now() + self.operation_timeout;
        let mut backoff = Backoff::default();

        while op.state() == OperationState::Writing {
            let untouched = op.unwritten().len() == op.frame().len();
            if untouched && op.cancel_requested() {
                op.cancel();
                return Ok(());
            }
            if Instant::now() >= deadline {
                return self.timed_out(op);
            }
            match self.write_some(op) {
                Ok(progressed) => backoff.step(progressed),
                Err(err) => return Err(self.fail(op, err)),
            }
        }

        let mut discarding = false;
        loop {
            if !discarding && op.cancel_requested() {
                op.cancel();
                discarding = true;
            }
            let done = if discarding {
                op.discard(&mut self.inbound)
            } else {
                op.read(&mut self.inbound)
            };
            match done {
                Ok(true) => return Ok(()),
                Ok(false) => {}
                Err(err) => return Err(self.fail(op, err.into())),
            }
            if Instant::now() >= deadline {
                return self.timed_out(op);
            }
            match self.fill() {
                Ok(progressed) => backoff.step(progressed),
                Err(err) => return Err(self.fail(op, err)),
            }
        }
    }

    /// Closes the transport; TLS sessions send close_notify first.
    pub fn close(&mut self) -> ClientResult<()> {
        match &mut self.transport {
            Transport::Tls(tls) => Ok(tls.close()?),
            Transport::Plain(socket) => match socket.shutdown() {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == io::ErrorKind::NotConnected => Ok(()),
                Err(err) => Err(err.into()),
            },
        }
    }

    fn write_some(&mut self, op: &mut Operation) -> ClientResult<bool> {
        match &mut self.transport {
            Transport::Plain(socket) => {
                let written = match socket.write(op.unwritten()) {
                    Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero).into()),
                    Ok(n) => n,
                    Err(err)
                        if matches!(
                            err.kind(),
                            io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                        ) =>
                    {
                        return Ok(false)
                    }
                    Err(err) => return Err(err.into()),
                };
                op.wrote(written);
                Ok(true)
            }
            Transport::Tls(tls) => {
                let mut progressed = false;
                if !self.outbound.is_empty() {
                    progressed |= tls.write_outgoing(&mut self.outbound)? > 0;
                }
                if self.outbound.is_empty() && !op.unwritten().is_empty() {
                    match tls.encrypt(op.unwritten(), &mut self.outbound)? {
                        Encrypted::Produced(n) => progressed |= n > 0,
                        Encrypted::NeedsLargerBuffer => {
                            enlarge(&mut self.outbound, tls.session().packet_buffer_size);
                            progressed = true;
                        }
                    }
                    progressed |= tls.write_outgoing(&mut self.outbound)? > 0;
                }
                if self.outbound.is_empty() && op.unwritten().is_empty() {
                    op.wrote(0);
                }
                Ok(progressed)
            }
        }
    }

    /// Moves whatever the socket has into `inbound` as plaintext.
    fn fill(&mut self) -> ClientResult<bool> {
        match &mut self.transport {
            Transport::Plain(socket) => {
                self.scratch.clear();
                match read_socket(socket, &mut self.scratch)? {
                    SocketRead::Eof => Err(ClientError::ConnectionClosed),
                    SocketRead::WouldBlock => Ok(false),
                    SocketRead::Data(n) => {
                        self.inbound.extend_from_slice(self.scratch.as_slice());
                        Ok(n > 0)
                    }
                }
            }
            Transport::Tls(tls) => {
                let read = tls.read_incoming()?;
                let mut progressed = false;
                while let Some(plain) = tls.decrypt_incoming()? {
                    self.inbound.extend_from_slice(plain);
                    progressed = true;
                }
                match read {
                    SocketRead::Eof if !progressed => Err(ClientError::ConnectionClosed),
                    SocketRead::Data(n) => Ok(progressed || n > 0),
                    _ => Ok(progressed),
                }
            }
        }
    }

    fn timed_out(&mut self, op: &mut Operation) -> ClientResult<()> {
        warn!(
            op = op.name(),
            timeout_ms = self.operation_timeout.as_millis() as u64,
            "operation timed out"
        );
        if !op.state().is_terminal() {
            op.time_out();
        }
        // A late reply would land in front of the next response.
        self.broken = Some(FailureAction::Reconnect);
        Err(ClientError::OperationTimeout)
    }

    fn fail(&mut self, op: &mut Operation, err: ClientError) -> ClientError {
        error!(op = op.name(), %err, "connection failed");
        if !op.state().is_terminal() {
            op.cancel();
        }
        let failure = NodeFailure {
            node: self.node.clone(),
            error: err.to_string(),
            mode: self.failure_mode,
        };
        let action = self.failure.on_connection_failure(&failure);
        debug!(?action, "failure handler decided");
        self.broken = Some(action);
        if let Err(close_err) = self.close() {
            debug!(%close_err, "close after failure failed");
        }
        err
    }
}
