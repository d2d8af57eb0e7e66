//! # TLS Engine Boundary
//!
//! The transport is polymorphic over any engine with a non-blocking,
//! buffer-in/buffer-out handshake and record API. Engines never touch the
//! socket; they read from a slice and append into a [`RecordBuffer`],
//! reporting how much of each side they used.

use std::fmt;

use crate::error::TlsError;
use crate::transport::buffer::RecordBuffer;

/// Where the handshake stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStatus {
    /// The engine needs ciphertext from the peer.
    NeedUnwrap,
    /// The engine has bytes to send to the peer.
    NeedWrap,
    /// Delegated tasks must run before the handshake can progress.
    NeedTask,
    /// The last operation completed the handshake. Reported once.
    Finished,
    /// No handshake in progress.
    NotHandshaking,
}

/// Result of a single wrap/unwrap call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    Ok,
    /// The destination buffer is too small for the next record.
    BufferOverflow,
    /// The source does not yet hold a complete record.
    BufferUnderflow,
    /// The engine is closed in this direction.
    Closed,
}

/// Outcome of a wrap/unwrap call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineResult {
    pub status: EngineStatus,
    pub handshake: HandshakeStatus,
    /// Bytes taken from the source slice.
    pub consumed: usize,
    /// Bytes appended to the destination buffer.
    pub produced: usize,
}

impl EngineResult {
    pub fn new(status: EngineStatus, handshake: HandshakeStatus) -> Self {
        EngineResult {
            status,
            handshake,
            consumed: 0,
            produced: 0,
        }
    }

    pub fn with_counts(mut self, consumed: usize, produced: usize) -> Self {
        self.consumed = consumed;
        self.produced = produced;
        self
    }
}

/// Negotiated record sizing used to size the four buffers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionParams {
    /// Largest plaintext a single record can carry.
    pub application_buffer_size: usize,
    /// Largest ciphertext record, header included.
    pub packet_buffer_size: usize,
    /// Negotiated cipher suite, once known.
    pub cipher_suite: Option<String>,
}

/// CPU-bound work an engine hands back to the driving thread.
pub struct DelegatedTask(Box<dyn FnOnce() + Send>);

impl DelegatedTask {
    pub fn new(task: impl FnOnce() + Send + 'static) -> Self {
        DelegatedTask(Box::new(task))
    }

    pub fn run(self) {
        (self.0)()
    }
}

impl fmt::Debug for DelegatedTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DelegatedTask")
    }
}

/// Non-blocking TLS engine.
pub trait TlsEngine {
    fn begin_handshake(&mut self) -> Result<(), TlsError>;

    /// Current handshake status. Never reports `Finished`; only results do.
    fn handshake_status(&self) -> HandshakeStatus;

    /// Encrypts from `src` into `dst`, or emits pending handshake bytes.
    fn wrap(&mut self, src: &[u8], dst: &mut RecordBuffer) -> Result<EngineResult, TlsError>;

    /// Decrypts at most one record from `src` into `dst`.
    fn unwrap(&mut self, src: &[u8], dst: &mut RecordBuffer) -> Result<EngineResult, TlsError>;

    /// Next pending delegated task, if any.
    fn delegated_task(&mut self) -> Option<DelegatedTask>;

    /// Signals that no more inbound data will arrive.
    ///
    /// Errors when the peer never sent its close notification.
    fn close_inbound(&mut self) -> Result<(), TlsError>;

    /// Queues this side's close notification.
    fn close_outbound(&mut self);

    fn is_inbound_done(&self) -> bool;

    fn is_outbound_done(&self) -> bool;

    fn session(&self) -> SessionParams;
}
