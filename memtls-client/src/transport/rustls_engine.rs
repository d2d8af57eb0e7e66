//! # rustls Adapter
//!
//! Presents a `rustls::Connection` through the [`TlsEngine`] contract.
//!
//! rustls buffers internally, so the adapter enforces the record-at-a-time
//! semantics itself: `unwrap` feeds exactly one complete TLS record per call
//! (parsing the 5-byte record header to find its end) and reports an
//! underflow, consuming nothing, when the record is incomplete.

use std::io;
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, ServerName};
use rustls::{
    ClientConfig, ClientConnection, Connection, RootCertStore, ServerConfig, ServerConnection,
};
use tracing::{debug, trace};

use super::{
    DelegatedTask, EngineResult, EngineStatus, HandshakeStatus, RecordBuffer, SessionParams,
    TlsEngine,
};
use crate::error::TlsError;

/// Largest plaintext carried by one record.
pub const MAX_FRAGMENT_LEN: usize = 16 * 1024;
const RECORD_HEADER_LEN: usize = 5;
/// Ciphertext expansion allowed per record.
const MAX_EXPANSION: usize = 2048;
/// Largest ciphertext record, header included.
pub const PACKET_BUFFER_SIZE: usize = MAX_FRAGMENT_LEN + MAX_EXPANSION + RECORD_HEADER_LEN;
/// Room needed beyond the plaintext when sealing one record.
const SEAL_OVERHEAD: usize = 64;
const CONTENT_TYPE_APPLICATION_DATA: u8 = 23;

/// Builds a client config over the ring provider.
pub fn client_config(roots: RootCertStore) -> Result<Arc<ClientConfig>, TlsError> {
    let config =
        ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()?
            .with_root_certificates(roots)
            .with_no_client_auth();
    Ok(Arc::new(config))
}

/// Loads every certificate of a PEM file into a root store.
pub fn load_roots(path: &Path) -> Result<RootCertStore, TlsError> {
    let mut roots = RootCertStore::empty();
    for cert in CertificateDer::pem_file_iter(path).map_err(pem_error)? {
        roots.add(cert.map_err(pem_error)?)?;
    }
    if roots.is_empty() {
        return Err(TlsError::Io(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("no certificates in {}", path.display()),
        )));
    }
    Ok(roots)
}

fn pem_error(err: rustls::pki_types::pem::Error) -> TlsError {
    TlsError::Io(io::Error::new(io::ErrorKind::InvalidData, err.to_string()))
}

/// [`TlsEngine`] over a rustls client or server connection.
pub struct RustlsEngine {
    conn: Connection,
    outbound_closed: bool,
    inbound_closed: bool,
    peer_closed: bool,
    failed: bool,
    finished_reported: bool,
}

impl RustlsEngine {
    /// Client side. `server_name` drives SNI and certificate verification.
    pub fn client(config: Arc<ClientConfig>, server_name: &str) -> Result<Self, TlsError> {
        let name = ServerName::try_from(server_name.to_owned())
            .map_err(|_| TlsError::InvalidServerName(server_name.to_owned()))?;
        let conn = ClientConnection::new(config, name)?;
        Ok(Self::from_connection(conn.into()))
    }

    /// Server side, used by the reference node and tests.
    pub fn server(config: Arc<ServerConfig>) -> Result<Self, TlsError> {
        let conn = ServerConnection::new(config)?;
        Ok(Self::from_connection(conn.into()))
    }

    fn from_connection(conn: Connection) -> Self {
        RustlsEngine {
            conn,
            outbound_closed: false,
            inbound_closed: false,
            peer_closed: false,
            failed: false,
            finished_reported: false,
        }
    }

    /// Status after an operation; reports `Finished` exactly once.
    fn advance_status(&mut self) -> HandshakeStatus {
        match self.handshake_status() {
            HandshakeStatus::NotHandshaking
                if !self.finished_reported && !self.failed && !self.conn.is_handshaking() =>
            {
                self.finished_reported = true;
                HandshakeStatus::Finished
            }
            status => status,
        }
    }

    fn result(&mut self, status: EngineStatus, consumed: usize, produced: usize) -> EngineResult {
        let handshake = self.advance_status();
        EngineResult::new(status, handshake).with_counts(consumed, produced)
    }

    /// Moves queued TLS bytes (handshake, alerts, sealed records) into `dst`.
    fn write_pending(&mut self, dst: &mut RecordBuffer) -> Result<usize, TlsError> {
        let mut total = 0;
        while self.conn.wants_write() {
            match self.conn.write_tls(dst) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => return Err(err.into()),
            }
        }
        Ok(total)
    }

    /// Moves decrypted plaintext into `dst` as far as it fits.
    fn drain_plaintext(&mut self, dst: &mut RecordBuffer) -> Result<usize, TlsError> {
        let mut total = 0;
        while dst.spare() > 0 {
            match dst.read_from(&mut self.conn.reader()) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(err)
                    if matches!(
                        err.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::UnexpectedEof
                    ) =>
                {
                    break
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(total)
    }

    /// Feeds `record` to rustls and processes it.
    fn feed(&mut self, record: &[u8]) -> Result<usize, TlsError> {
        let mut consumed = 0;
        while consumed < record.len() {
            let mut rest = &record[consumed..];
            let n = match self.conn.read_tls(&mut rest) {
                Ok(n) => n,
                Err(err) => {
                    self.failed = true;
                    return Err(err.into());
                }
            };
            if n == 0 {
                break;
            }
            consumed += n;
        }
        match self.conn.process_new_packets() {
            Ok(state) => {
                if state.peer_has_closed() {
                    debug!("peer sent close_notify");
                    self.peer_closed = true;
                }
                Ok(consumed)
            }
            Err(err) => {
                // The alert stays queued; the next wrap flushes it.
                self.failed = true;
                Err(err.into())
            }
        }
    }
}

/// Type and total length of the first complete record in `src`.
fn complete_record(src: &[u8]) -> Option<(u8, usize)> {
    if src.len() < RECORD_HEADER_LEN {
        return None;
    }
    let len = RECORD_HEADER_LEN + u16::from_be_bytes([src[3], src[4]]) as usize;
    if len > PACKET_BUFFER_SIZE {
        // Let rustls reject the oversized header.
        return Some((src[0], RECORD_HEADER_LEN));
    }
    (src.len() >= len).then_some((src[0], len))
}

impl TlsEngine for RustlsEngine {
    fn begin_handshake(&mut self) -> Result<(), TlsError> {
        trace!(client = matches!(self.conn, Connection::Client(_)), "handshake begins");
        Ok(())
    }

    fn handshake_status(&self) -> HandshakeStatus {
        if self.conn.wants_write() {
            HandshakeStatus::NeedWrap
        } else if self.failed || (self.outbound_closed && self.is_inbound_done()) {
            HandshakeStatus::NotHandshaking
        } else if self.conn.is_handshaking() {
            HandshakeStatus::NeedUnwrap
        } else {
            HandshakeStatus::NotHandshaking
        }
    }

    fn wrap(&mut self, src: &[u8], dst: &mut RecordBuffer) -> Result<EngineResult, TlsError> {
        let mut produced = self.write_pending(dst)?;
        if self.conn.wants_write() {
            let status = if produced == 0 {
                EngineStatus::BufferOverflow
            } else {
                EngineStatus::Ok
            };
            return Ok(self.result(status, 0, produced));
        }
        if self.failed || self.outbound_closed {
            return Ok(self.result(EngineStatus::Closed, 0, produced));
        }
        if src.is_empty() || self.conn.is_handshaking() {
            return Ok(self.result(EngineStatus::Ok, 0, produced));
        }

        let n = src.len().min(MAX_FRAGMENT_LEN);
        if dst.spare() < n + SEAL_OVERHEAD {
            return Ok(self.result(EngineStatus::BufferOverflow, 0, produced));
        }
        let consumed = io::Write::write(&mut self.conn.writer(), &src[..n])?;
        produced += self.write_pending(dst)?;
        Ok(self.result(EngineStatus::Ok, consumed, produced))
    }

    fn unwrap(&mut self, src: &[u8], dst: &mut RecordBuffer) -> Result<EngineResult, TlsError> {
        let drained = self.drain_plaintext(dst)?;
        if drained > 0 {
            return Ok(self.result(EngineStatus::Ok, 0, drained));
        }
        if self.failed || self.inbound_closed || self.peer_closed {
            return Ok(self.result(EngineStatus::Closed, 0, 0));
        }

        let Some((content_type, len)) = complete_record(src) else {
            return Ok(self.result(EngineStatus::BufferUnderflow, 0, 0));
        };
        let payload = len - RECORD_HEADER_LEN;
        if content_type == CONTENT_TYPE_APPLICATION_DATA
            && !self.conn.is_handshaking()
            && dst.spare() < payload.min(MAX_FRAGMENT_LEN)
        {
            return Ok(self.result(EngineStatus::BufferOverflow, 0, 0));
        }

        let consumed = self.feed(&src[..len])?;
        let produced = self.drain_plaintext(dst)?;
        let status = if produced == 0 && self.peer_closed {
            EngineStatus::Closed
        } else {
            EngineStatus::Ok
        };
        Ok(self.result(status, consumed, produced))
    }

    fn delegated_task(&mut self) -> Option<DelegatedTask> {
        None
    }

    fn close_inbound(&mut self) -> Result<(), TlsError> {
        self.inbound_closed = true;
        if self.peer_closed {
            Ok(())
        } else {
            Err(TlsError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "inbound closed before receiving close_notify",
            )))
        }
    }

    fn close_outbound(&mut self) {
        if !self.outbound_closed {
            self.outbound_closed = true;
            self.conn.send_close_notify();
        }
    }

    fn is_inbound_done(&self) -> bool {
        self.inbound_closed || self.peer_closed
    }

    fn is_outbound_done(&self) -> bool {
        self.outbound_closed && !self.conn.wants_write()
    }

    fn session(&self) -> SessionParams {
        SessionParams {
            application_buffer_size: MAX_FRAGMENT_LEN,
            packet_buffer_size: PACKET_BUFFER_SIZE,
            cipher_suite: self
                .conn
                .negotiated_cipher_suite()
                .map(|suite| format!("{:?}", suite.suite())),
        }
    }
}

impl std::fmt::Debug for RustlsEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RustlsEngine")
            .field("handshaking", &self.conn.is_handshaking())
            .field("outbound_closed", &self.outbound_closed)
            .field("inbound_closed", &self.inbound_closed)
            .field("peer_closed", &self.peer_closed)
            .field("failed", &self.failed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::rustls_pair;

    fn pump(from: &mut RustlsEngine, to: &mut RustlsEngine) -> usize {
        let mut wire = RecordBuffer::with_capacity(PACKET_BUFFER_SIZE * 4);
        let mut moved = 0;
        loop {
            let result = from.wrap(&[], &mut wire).unwrap();
            if result.produced == 0 {
                break;
            }
        }
        let mut plain = RecordBuffer::with_capacity(MAX_FRAGMENT_LEN);
        while !wire.is_empty() {
            let result = to.unwrap(wire.as_slice(), &mut plain).unwrap();
            wire.consume(result.consumed);
            moved += result.consumed;
            if result.consumed == 0 {
                break;
            }
        }
        moved
    }

    fn complete(client: &mut RustlsEngine, server: &mut RustlsEngine) {
        for _ in 0..8 {
            pump(client, server);
            pump(server, client);
        }
        assert_eq!(client.handshake_status(), HandshakeStatus::NotHandshaking);
        assert_eq!(server.handshake_status(), HandshakeStatus::NotHandshaking);
    }

    #[test]
    fn client_starts_by_wrapping() {
        let (client, server) = rustls_pair();
        assert_eq!(client.handshake_status(), HandshakeStatus::NeedWrap);
        assert_eq!(server.handshake_status(), HandshakeStatus::NeedUnwrap);
    }

    #[test]
    fn incomplete_record_underflows_without_consuming() {
        let (mut client, mut server) = rustls_pair();
        let mut hello = RecordBuffer::with_capacity(PACKET_BUFFER_SIZE);
        client.wrap(&[], &mut hello).unwrap();
        let partial = &hello.as_slice()[..hello.len() - 1];

        let mut plain = RecordBuffer::with_capacity(MAX_FRAGMENT_LEN);
        let result = server.unwrap(partial, &mut plain).unwrap();
        assert_eq!(result.status, EngineStatus::BufferUnderflow);
        assert_eq!(result.consumed, 0);

        let result = server.unwrap(hello.as_slice(), &mut plain).unwrap();
        assert_eq!(result.status, EngineStatus::Ok);
        assert_eq!(result.consumed, hello.len());
    }

    /// One flight from `from` to `to`; counts `Finished` reports on both.
    fn flight(from: &mut RustlsEngine, to: &mut RustlsEngine) -> usize {
        let mut wire = RecordBuffer::with_capacity(PACKET_BUFFER_SIZE * 4);
        let mut plain = RecordBuffer::with_capacity(MAX_FRAGMENT_LEN);
        let mut finished = 0;
        let result = from.wrap(&[], &mut wire).unwrap();
        finished += usize::from(result.handshake == HandshakeStatus::Finished);
        while let Some((_, len)) = complete_record(wire.as_slice()) {
            let result = to.unwrap(&wire.as_slice()[..len], &mut plain).unwrap();
            finished += usize::from(result.handshake == HandshakeStatus::Finished);
            wire.consume(len);
        }
        finished
    }

    #[test]
    fn finished_is_reported_once() {
        let (mut client, mut server) = rustls_pair();
        let mut finished = 0;
        for _ in 0..8 {
            finished += flight(&mut client, &mut server);
            finished += flight(&mut server, &mut client);
        }
        assert_eq!(finished, 2);
    }

    #[test]
    fn application_data_round_trips() {
        let (mut client, mut server) = rustls_pair();
        complete(&mut client, &mut server);

        let mut wire = RecordBuffer::with_capacity(PACKET_BUFFER_SIZE);
        let result = client.wrap(b"get foo\r\n", &mut wire).unwrap();
        assert_eq!(result.status, EngineStatus::Ok);
        assert_eq!(result.consumed, 9);

        let mut plain = RecordBuffer::with_capacity(MAX_FRAGMENT_LEN);
        let mut received = Vec::new();
        while !wire.is_empty() {
            let result = server.unwrap(wire.as_slice(), &mut plain).unwrap();
            wire.consume(result.consumed);
            received.extend_from_slice(plain.as_slice());
            plain.clear();
        }
        assert_eq!(received, b"get foo\r\n");
    }

    #[test]
    fn small_destination_overflows() {
        let (mut client, mut server) = rustls_pair();
        complete(&mut client, &mut server);

        let mut tiny = RecordBuffer::with_capacity(16);
        let result = client.wrap(&[7u8; 1024], &mut tiny).unwrap();
        assert_eq!(result.status, EngineStatus::BufferOverflow);
        assert_eq!(result.consumed, 0);
    }

    #[test]
    fn close_notify_closes_peer_inbound() {
        let (mut client, mut server) = rustls_pair();
        complete(&mut client, &mut server);

        client.close_outbound();
        let mut wire = RecordBuffer::with_capacity(PACKET_BUFFER_SIZE);
        let result = client.wrap(&[], &mut wire).unwrap();
        assert!(result.produced > 0);
        assert!(client.is_outbound_done());

        let mut plain = RecordBuffer::with_capacity(MAX_FRAGMENT_LEN);
        let result = server.unwrap(wire.as_slice(), &mut plain).unwrap();
        assert_eq!(result.status, EngineStatus::Closed);
        assert!(server.is_inbound_done());
        assert!(server.close_inbound().is_ok());
    }

    #[test]
    fn inbound_close_without_notify_errors() {
        let (mut client, _server) = rustls_pair();
        assert!(client.close_inbound().is_err());
        assert!(client.is_inbound_done());
    }

    #[test]
    fn invalid_server_name_is_rejected() {
        let (config, _) = crate::transport::testing::configs();
        let err = RustlsEngine::client(config, "not a host name!").unwrap_err();
        assert!(matches!(err, TlsError::InvalidServerName(_)));
    }
}
