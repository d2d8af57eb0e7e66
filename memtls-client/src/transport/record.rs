//! Steady-state record layer: one record in, one record out.

use bytes::Buf;
use tracing::{debug, trace};

use super::{enlarge, flush_socket, EngineStatus, RecordBuffer, Socket, TlsEngine, TlsTransport};
use crate::error::TlsError;

/// Outcome of [`TlsTransport::encrypt`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encrypted {
    /// Ciphertext bytes appended to the destination.
    Produced(usize),
    /// The destination cannot hold the next record; grow it and retry.
    NeedsLargerBuffer,
}

impl<S: Socket, E: TlsEngine> TlsTransport<S, E> {
    /// Encrypts one record's worth of `src` into `dst`, advancing `src` past
    /// what was consumed.
    pub fn encrypt<B: Buf>(
        &mut self,
        src: &mut B,
        dst: &mut RecordBuffer,
    ) -> Result<Encrypted, TlsError> {
        let _entered = self.span.clone().entered();
        let result = self.engine.wrap(src.chunk(), dst)?;
        src.advance(result.consumed);
        match result.status {
            EngineStatus::Ok => {
                trace!(consumed = result.consumed, produced = result.produced, "encrypted");
                Ok(Encrypted::Produced(result.produced))
            }
            EngineStatus::BufferOverflow => Ok(Encrypted::NeedsLargerBuffer),
            EngineStatus::Closed => Err(TlsError::Closed),
            status => Err(TlsError::UnexpectedStatus { op: "wrap", status }),
        }
    }

    /// Decrypts one record from `src`.
    ///
    /// Returns the plaintext, or `None` when `src` does not yet hold a
    /// complete record (nothing is consumed in that case). A closed session
    /// shuts the socket and fails with [`TlsError::Closed`].
    pub fn decrypt(&mut self, src: &mut RecordBuffer) -> Result<Option<&[u8]>, TlsError> {
        let _entered = self.span.clone().entered();
        if self.unwrap_record(src)? {
            Ok(Some(self.buffers.peer_plain.as_slice()))
        } else {
            Ok(None)
        }
    }

    /// Decrypts one record from the transport's own peer-ciphertext buffer,
    /// which [`TlsTransport::read_incoming`] fills.
    pub fn decrypt_incoming(&mut self) -> Result<Option<&[u8]>, TlsError> {
        let _entered = self.span.clone().entered();
        let mut incoming = std::mem::replace(
            &mut self.buffers.peer_cipher,
            RecordBuffer::with_capacity(0),
        );
        let decrypted = self.unwrap_record(&mut incoming);
        self.buffers.peer_cipher = incoming;
        if decrypted? {
            Ok(Some(self.buffers.peer_plain.as_slice()))
        } else {
            Ok(None)
        }
    }

    /// Unwraps into `peer_plain`; true when a record was decrypted.
    fn unwrap_record(&mut self, src: &mut RecordBuffer) -> Result<bool, TlsError> {
        self.buffers.peer_plain.clear();
        loop {
            let result = self.engine.unwrap(src.as_slice(), &mut self.buffers.peer_plain)?;
            src.consume(result.consumed);
            match result.status {
                // Post-handshake messages decrypt to nothing; move on.
                EngineStatus::Ok if result.produced == 0 && result.consumed > 0 => continue,
                EngineStatus::Ok => return Ok(result.produced > 0),
                EngineStatus::BufferOverflow => {
                    let required = self.engine.session().application_buffer_size;
                    enlarge(&mut self.buffers.peer_plain, required);
                }
                EngineStatus::BufferUnderflow => return Ok(false),
                EngineStatus::Closed => {
                    debug!("peer closed the tls session");
                    self.engine.close_outbound();
                    if self.engine.wrap(&[], &mut self.buffers.local_cipher).is_ok() {
                        if let Err(err) =
                            flush_socket(&mut self.socket, &mut self.buffers.local_cipher)
                        {
                            debug!(%err, "could not answer close_notify");
                        }
                    }
                    self.closed = true;
                    if let Err(err) = self.socket.shutdown() {
                        debug!(%err, "socket shutdown after close failed");
                    }
                    return Err(TlsError::Closed);
                }
            }
        }
    }
}
