//! Handshake driver.
//!
//! The loop is a transition function over [`HandshakeStatus`]: each
//! non-terminal status maps to one step that may touch the socket once, and
//! returns the next status. `Finished` and `NotHandshaking` end the loop.

use std::time::{Duration, Instant};

use tracing::{debug, error, info, trace, warn};

use super::{
    enlarge, flush_socket, read_socket, Backoff, EngineStatus, HandshakeStatus, Socket,
    SocketRead, TlsBuffers, TlsEngine, TlsTransport,
};
use crate::error::TlsError;

/// What one handshake step decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Continue(HandshakeStatus),
    /// Nothing moved: the socket had no bytes and the engine consumed none,
    /// or the socket refused the pending flight.
    Idle(HandshakeStatus),
    /// Stop without completing; the engine or the peer closed.
    Abandon,
}

impl<S: Socket, E: TlsEngine> TlsTransport<S, E> {
    /// Drives the handshake to completion without blocking on the socket.
    ///
    /// Returns `Ok(true)` once the engine reports `Finished`, `Ok(false)` when
    /// the handshake stopped because either side closed, and
    /// [`TlsError::HandshakeTimeout`] once `timeout` has elapsed. The deadline
    /// is checked before every step, so a zero timeout fails before any
    /// socket I/O.
    ///
    /// Ciphertext that arrived after the last handshake record stays buffered
    /// for [`TlsTransport::decrypt_incoming`].
    pub fn handshake(&mut self, timeout: Duration) -> Result<bool, TlsError> {
        let _entered = self.span.clone().entered();
        let session = self.engine.session();
        self.buffers = TlsBuffers::for_session(&session);

        let started = Instant::now();
        if let Err(err) = self.engine.begin_handshake() {
            error!(%err, "failed to begin tls handshake");
        }
        let mut status = self.engine.handshake_status();
        debug!(?status, "starting tls handshake");

        let mut backoff = Backoff::default();
        loop {
            if matches!(
                status,
                HandshakeStatus::Finished | HandshakeStatus::NotHandshaking
            ) {
                break;
            }
            if started.elapsed() >= timeout {
                warn!(?status, elapsed = ?started.elapsed(), "tls handshake timed out");
                return Err(TlsError::HandshakeTimeout);
            }
            match self.step(status)? {
                Step::Continue(next) => {
                    backoff.step(true);
                    status = next;
                }
                Step::Idle(next) => {
                    backoff.step(false);
                    status = next;
                }
                Step::Abandon => {
                    info!("tls handshake abandoned, session closed");
                    return Ok(false);
                }
            }
        }

        // Final flight may still sit in the local buffer if the socket
        // pushed back.
        while !self.buffers.local_cipher.is_empty() {
            if started.elapsed() >= timeout {
                warn!("tls handshake timed out flushing final flight");
                return Err(TlsError::HandshakeTimeout);
            }
            let sent = flush_socket(&mut self.socket, &mut self.buffers.local_cipher)?;
            backoff.step(sent > 0);
        }

        let finished = status == HandshakeStatus::Finished;
        info!(
            finished,
            cipher_suite = self.engine.session().cipher_suite.as_deref().unwrap_or("none"),
            residual = self.buffers.peer_cipher.len(),
            "tls handshake ended"
        );
        Ok(finished)
    }

    fn step(&mut self, status: HandshakeStatus) -> Result<Step, TlsError> {
        if !self.buffers.local_cipher.is_empty() {
            flush_socket(&mut self.socket, &mut self.buffers.local_cipher)?;
        }
        match status {
            HandshakeStatus::NeedUnwrap => self.step_unwrap(),
            HandshakeStatus::NeedWrap => self.step_wrap(),
            HandshakeStatus::NeedTask => {
                let mut ran = 0usize;
                while let Some(task) = self.engine.delegated_task() {
                    task.run();
                    ran += 1;
                }
                trace!(ran, "ran delegated tasks");
                Ok(Step::Continue(self.engine.handshake_status()))
            }
            other => Err(TlsError::InvalidHandshakeStatus(other)),
        }
    }

    fn step_unwrap(&mut self) -> Result<Step, TlsError> {
        let session = self.engine.session();
        if self.buffers.peer_cipher.spare() == 0 {
            enlarge(&mut self.buffers.peer_cipher, session.packet_buffer_size);
        }

        let read = read_socket(&mut self.socket, &mut self.buffers.peer_cipher)?;
        match read {
            SocketRead::Eof => {
                if self.engine.is_inbound_done() && self.engine.is_outbound_done() {
                    return Ok(Step::Abandon);
                }
                self.end_of_stream();
                return Ok(Step::Continue(self.engine.handshake_status()));
            }
            SocketRead::Data(n) => trace!(read = n, "read handshake bytes"),
            SocketRead::WouldBlock => {}
        }

        let result = match self
            .engine
            .unwrap(self.buffers.peer_cipher.as_slice(), &mut self.buffers.peer_plain)
        {
            Ok(result) => result,
            Err(err) => {
                error!(%err, "tls engine failed while processing handshake data");
                self.engine.close_outbound();
                return Ok(Step::Continue(self.engine.handshake_status()));
            }
        };
        self.buffers.peer_cipher.consume(result.consumed);
        self.buffers.peer_plain.clear();

        match result.status {
            EngineStatus::Ok => Ok(Step::Continue(result.handshake)),
            EngineStatus::BufferOverflow => {
                enlarge(&mut self.buffers.peer_plain, session.application_buffer_size);
                Ok(Step::Continue(result.handshake))
            }
            EngineStatus::BufferUnderflow => {
                if self.buffers.peer_cipher.spare() == 0 {
                    enlarge(&mut self.buffers.peer_cipher, session.packet_buffer_size);
                }
                if read == SocketRead::WouldBlock && result.consumed == 0 {
                    return Ok(Step::Idle(result.handshake));
                }
                Ok(Step::Continue(result.handshake))
            }
            EngineStatus::Closed => {
                if self.engine.is_outbound_done() {
                    return Ok(Step::Abandon);
                }
                self.engine.close_outbound();
                Ok(Step::Continue(self.engine.handshake_status()))
            }
        }
    }

    fn step_wrap(&mut self) -> Result<Step, TlsError> {
        if !self.buffers.local_cipher.is_empty() {
            // Socket refused the previous flight; retry the flush first.
            return Ok(Step::Idle(HandshakeStatus::NeedWrap));
        }
        let result = match self
            .engine
            .wrap(self.buffers.local_plain.as_slice(), &mut self.buffers.local_cipher)
        {
            Ok(result) => result,
            Err(err) => {
                error!(%err, "tls engine failed while producing handshake data");
                self.engine.close_outbound();
                return Ok(Step::Continue(self.engine.handshake_status()));
            }
        };
        self.buffers.local_plain.consume(result.consumed);

        match result.status {
            EngineStatus::Ok => {
                flush_socket(&mut self.socket, &mut self.buffers.local_cipher)?;
                Ok(Step::Continue(result.handshake))
            }
            EngineStatus::BufferOverflow => {
                let required = self.engine.session().packet_buffer_size;
                enlarge(&mut self.buffers.local_cipher, required);
                Ok(Step::Continue(result.handshake))
            }
            EngineStatus::BufferUnderflow => Err(TlsError::WrapUnderflow),
            EngineStatus::Closed => {
                if let Err(err) = flush_socket(&mut self.socket, &mut self.buffers.local_cipher) {
                    error!(%err, "failed to send close notification during handshake");
                }
                self.buffers.peer_cipher.clear();
                Ok(Step::Continue(self.engine.handshake_status()))
            }
        }
    }

    fn end_of_stream(&mut self) {
        if let Err(err) = self.engine.close_inbound() {
            error!(%err, "peer closed the stream without sending close_notify");
        }
        self.engine.close_outbound();
    }
}
