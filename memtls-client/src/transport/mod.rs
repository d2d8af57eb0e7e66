//! # TLS Transport Engine
//!
//! Purpose: Own one non-blocking socket, one TLS engine, and the four
//! buffers between them; drive the handshake and the steady-state record
//! layer without ever blocking on I/O.
//!
//! ## Design Principles
//! 1. **Explicit Buffers**: local-plaintext, local-ciphertext,
//!    peer-ciphertext and peer-plaintext are separate [`RecordBuffer`]s,
//!    never aliased, and only grow.
//! 2. **Three Kinds of "Not Now"**: underflow (read more), overflow (grow a
//!    buffer) and closed (terminal) are handled separately.
//! 3. **Engine Agnostic**: anything implementing [`TlsEngine`] can be driven;
//!    [`RustlsEngine`] adapts rustls.
//! 4. **Injected Logging**: the caller hands in the `tracing::Span` every
//!    call runs under.
//!
//! ## Buffer Roles
//!
//! ```text
//!  caller ──► local_plain ──wrap──► local_cipher ──write──► socket
//!  caller ◄── peer_plain ◄─unwrap── peer_cipher  ◄──read─── socket
//! ```

mod buffer;
mod engine;
mod handshake;
mod record;
mod rustls_engine;

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

use tracing::{debug, Span};

pub use buffer::RecordBuffer;
pub use engine::{
    DelegatedTask, EngineResult, EngineStatus, HandshakeStatus, SessionParams, TlsEngine,
};
pub use record::Encrypted;
pub use rustls_engine::{
    client_config, load_roots, RustlsEngine, MAX_FRAGMENT_LEN, PACKET_BUFFER_SIZE,
};

use crate::error::TlsError;

/// Stream socket the transport reads from and writes to.
///
/// Reads and writes must be non-blocking: "nothing available" is reported as
/// `io::ErrorKind::WouldBlock`, end-of-stream as `Ok(0)`.
pub trait Socket: Read + Write {
    /// Closes both directions of the socket.
    fn shutdown(&mut self) -> io::Result<()>;
}

impl Socket for TcpStream {
    fn shutdown(&mut self) -> io::Result<()> {
        TcpStream::shutdown(self, Shutdown::Both)
    }
}

/// Outcome of one non-blocking socket read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketRead {
    Data(usize),
    WouldBlock,
    Eof,
}

/// Reads once from `socket` into `buffer`, mapping non-blocking results.
pub fn read_socket<S: Read + ?Sized>(
    socket: &mut S,
    buffer: &mut RecordBuffer,
) -> io::Result<SocketRead> {
    if buffer.spare() == 0 {
        return Ok(SocketRead::Data(0));
    }
    loop {
        return match buffer.read_from(socket) {
            Ok(0) => Ok(SocketRead::Eof),
            Ok(n) => Ok(SocketRead::Data(n)),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(SocketRead::WouldBlock),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => Err(err),
        };
    }
}

/// Writes readable bytes of `buffer` to `socket` until it would block.
///
/// Returns the number of bytes written; whatever the socket refused stays in
/// the buffer.
pub fn flush_socket<S: Write + ?Sized>(
    socket: &mut S,
    buffer: &mut RecordBuffer,
) -> io::Result<usize> {
    let mut total = 0;
    while !buffer.is_empty() {
        match buffer.write_to(socket) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => total += n,
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(total)
}

/// Grows `buffer` to the session-required size, doubling when that size
/// is already reached so the retry can make progress.
pub(crate) fn enlarge(buffer: &mut RecordBuffer, required: usize) {
    let before = buffer.capacity();
    if !buffer.grow(required) {
        buffer.grow(before.saturating_mul(2).max(1));
    }
    debug!(from = before, to = buffer.capacity(), "grew tls buffer");
}

/// Spins briefly, then sleeps, while the socket has nothing to offer.
#[derive(Debug, Default)]
pub(crate) struct Backoff {
    idle: u32,
}

impl Backoff {
    const SPIN_LIMIT: u32 = 16;
    const PAUSE: Duration = Duration::from_micros(200);

    pub(crate) fn step(&mut self, progressed: bool) {
        if progressed {
            self.idle = 0;
            return;
        }
        self.idle = self.idle.saturating_add(1);
        if self.idle <= Self::SPIN_LIMIT {
            std::thread::yield_now();
        } else {
            std::thread::sleep(Self::PAUSE);
        }
    }
}

/// The four buffers, sized from the session.
#[derive(Debug)]
pub(crate) struct TlsBuffers {
    pub(crate) local_plain: RecordBuffer,
    pub(crate) local_cipher: RecordBuffer,
    pub(crate) peer_cipher: RecordBuffer,
    pub(crate) peer_plain: RecordBuffer,
}

impl TlsBuffers {
    fn for_session(session: &SessionParams) -> Self {
        TlsBuffers {
            local_plain: RecordBuffer::with_capacity(session.application_buffer_size),
            local_cipher: RecordBuffer::with_capacity(session.packet_buffer_size),
            peer_cipher: RecordBuffer::with_capacity(session.packet_buffer_size),
            peer_plain: RecordBuffer::with_capacity(session.application_buffer_size),
        }
    }
}

/// TLS session over one non-blocking socket.
///
/// Handshake and record calls must be serialized by the owner; the type is
/// `&mut self` throughout.
pub struct TlsTransport<S, E> {
    socket: S,
    engine: E,
    buffers: TlsBuffers,
    span: Span,
    closed: bool,
}

impl<S: Socket, E: TlsEngine> TlsTransport<S, E> {
    /// Wraps a connected socket. `span` scopes every log line this transport
    /// emits.
    pub fn new(socket: S, engine: E, span: Span) -> Self {
        let buffers = TlsBuffers::for_session(&engine.session());
        TlsTransport {
            socket,
            engine,
            buffers,
            span,
            closed: false,
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn socket(&self) -> &S {
        &self.socket
    }

    pub fn socket_mut(&mut self) -> &mut S {
        &mut self.socket
    }

    pub fn session(&self) -> SessionParams {
        self.engine.session()
    }

    /// Ciphertext received but not yet decrypted.
    pub fn pending_ciphertext(&self) -> usize {
        self.buffers.peer_cipher.len()
    }

    /// Reads from the socket into the peer-ciphertext buffer, growing it
    /// when it is full.
    pub fn read_incoming(&mut self) -> Result<SocketRead, TlsError> {
        if self.buffers.peer_cipher.spare() == 0 {
            let required = self.engine.session().packet_buffer_size;
            enlarge(&mut self.buffers.peer_cipher, required);
        }
        Ok(read_socket(&mut self.socket, &mut self.buffers.peer_cipher)?)
    }

    /// Writes ciphertext produced by [`TlsTransport::encrypt`] to the socket.
    pub fn write_outgoing(&mut self, ciphertext: &mut RecordBuffer) -> Result<usize, TlsError> {
        Ok(flush_socket(&mut self.socket, ciphertext)?)
    }

    /// Sends close_notify and shuts the socket down. Idempotent.
    pub fn close(&mut self) -> Result<(), TlsError> {
        if self.closed {
            return Ok(());
        }
        let _entered = self.span.clone().entered();
        self.closed = true;
        self.engine.close_outbound();

        let mut rounds = 0;
        while !self.engine.is_outbound_done() && rounds < 4 {
            rounds += 1;
            let result = self
                .engine
                .wrap(&[], &mut self.buffers.local_cipher)?;
            if result.produced == 0 {
                break;
            }
        }
        if let Err(err) = flush_socket(&mut self.socket, &mut self.buffers.local_cipher) {
            debug!(%err, "could not send close notification");
        }
        debug!("closing tls transport");
        match self.socket.shutdown() {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing;
