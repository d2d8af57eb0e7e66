//! Test doubles for the transport: a scripted engine, a scripted socket,
//! an in-memory duplex pipe, and a self-signed rustls pair.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::{ClientConfig, RootCertStore, ServerConfig};

use super::rustls_engine::client_config;
use super::{
    DelegatedTask, EngineResult, EngineStatus, HandshakeStatus, RecordBuffer, RustlsEngine,
    SessionParams, Socket, TlsEngine,
};
use crate::error::TlsError;

#[derive(Debug, Clone)]
pub(crate) enum Script {
    Wrap(EngineResult),
    Unwrap(EngineResult),
}

/// Engine that replays scripted results in order.
pub(crate) struct ScriptedEngine {
    current: HandshakeStatus,
    scripts: VecDeque<Script>,
    tasks: usize,
    task_counter: Arc<AtomicUsize>,
    session: SessionParams,
    pub(crate) inbound_closed: bool,
    pub(crate) outbound_closed: bool,
}

impl ScriptedEngine {
    pub(crate) fn new(initial: HandshakeStatus, scripts: Vec<Script>) -> Self {
        ScriptedEngine {
            current: initial,
            scripts: scripts.into(),
            tasks: 0,
            task_counter: Arc::new(AtomicUsize::new(0)),
            session: SessionParams {
                application_buffer_size: 64,
                packet_buffer_size: 128,
                cipher_suite: None,
            },
            inbound_closed: false,
            outbound_closed: false,
        }
    }

    pub(crate) fn with_session(mut self, application: usize, packet: usize) -> Self {
        self.session.application_buffer_size = application;
        self.session.packet_buffer_size = packet;
        self
    }

    pub(crate) fn outbound_done(mut self, done: bool) -> Self {
        self.outbound_closed = done;
        self
    }

    pub(crate) fn with_tasks(mut self, tasks: usize) -> Self {
        self.tasks = tasks;
        self
    }

    pub(crate) fn task_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.task_counter)
    }
}

impl TlsEngine for ScriptedEngine {
    fn begin_handshake(&mut self) -> Result<(), TlsError> {
        Ok(())
    }

    fn handshake_status(&self) -> HandshakeStatus {
        if self.inbound_closed && self.outbound_closed {
            return HandshakeStatus::NotHandshaking;
        }
        match self.current {
            HandshakeStatus::Finished => HandshakeStatus::NotHandshaking,
            status => status,
        }
    }

    fn wrap(&mut self, _src: &[u8], dst: &mut RecordBuffer) -> Result<EngineResult, TlsError> {
        match self.scripts.front() {
            Some(Script::Wrap(_)) => {}
            _ => {
                self.current = HandshakeStatus::NeedUnwrap;
                return Ok(EngineResult::new(EngineStatus::Ok, HandshakeStatus::NeedUnwrap));
            }
        }
        let Some(Script::Wrap(mut result)) = self.scripts.pop_front() else {
            unreachable!("front was a wrap script");
        };
        let bytes: Vec<u8> = b"hs!".iter().copied().cycle().take(result.produced).collect();
        result.produced = dst.put_slice(&bytes);
        self.current = result.handshake;
        Ok(result)
    }

    fn unwrap(&mut self, src: &[u8], _dst: &mut RecordBuffer) -> Result<EngineResult, TlsError> {
        match self.scripts.front() {
            Some(Script::Unwrap(_)) => {}
            Some(Script::Wrap(_)) => {
                self.current = HandshakeStatus::NeedWrap;
                return Ok(EngineResult::new(
                    EngineStatus::BufferUnderflow,
                    HandshakeStatus::NeedWrap,
                ));
            }
            None => {
                return Ok(EngineResult::new(
                    EngineStatus::BufferUnderflow,
                    HandshakeStatus::NeedUnwrap,
                ));
            }
        }
        let Some(Script::Unwrap(mut result)) = self.scripts.pop_front() else {
            unreachable!("front was an unwrap script");
        };
        result.consumed = result.consumed.min(src.len());
        self.current = result.handshake;
        Ok(result)
    }

    fn delegated_task(&mut self) -> Option<DelegatedTask> {
        if self.tasks == 0 {
            if self.current == HandshakeStatus::NeedTask {
                self.current = HandshakeStatus::NeedUnwrap;
            }
            return None;
        }
        self.tasks -= 1;
        let counter = Arc::clone(&self.task_counter);
        Some(DelegatedTask::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }))
    }

    fn close_inbound(&mut self) -> Result<(), TlsError> {
        self.inbound_closed = true;
        Ok(())
    }

    fn close_outbound(&mut self) {
        self.outbound_closed = true;
    }

    fn is_inbound_done(&self) -> bool {
        self.inbound_closed
    }

    fn is_outbound_done(&self) -> bool {
        self.outbound_closed
    }

    fn session(&self) -> SessionParams {
        self.session.clone()
    }
}

/// Socket with canned inbound bytes that records everything written.
#[derive(Debug, Default)]
pub(crate) struct ScriptedSocket {
    incoming: VecDeque<u8>,
    eof: bool,
    pub(crate) written: Vec<u8>,
    pub(crate) reads: usize,
    pub(crate) writes: usize,
}

impl ScriptedSocket {
    pub(crate) fn with_incoming(data: &[u8]) -> Self {
        ScriptedSocket {
            incoming: data.iter().copied().collect(),
            ..Default::default()
        }
    }

    /// Report end-of-stream once the canned bytes run out.
    pub(crate) fn eof(mut self) -> Self {
        self.eof = true;
        self
    }
}

impl Read for ScriptedSocket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reads += 1;
        if self.incoming.is_empty() {
            return if self.eof {
                Ok(0)
            } else {
                Err(io::ErrorKind::WouldBlock.into())
            };
        }
        self.incoming.read(buf)
    }
}

impl Write for ScriptedSocket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writes += 1;
        self.written.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Socket for ScriptedSocket {
    fn shutdown(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Channel {
    data: VecDeque<u8>,
    closed: bool,
}

/// One end of an in-memory, non-blocking duplex byte stream.
#[derive(Debug)]
pub(crate) struct MemoryPipe {
    inbound: Arc<Mutex<Channel>>,
    outbound: Arc<Mutex<Channel>>,
}

impl MemoryPipe {
    pub(crate) fn pair() -> (MemoryPipe, MemoryPipe) {
        let a = Arc::new(Mutex::new(Channel::default()));
        let b = Arc::new(Mutex::new(Channel::default()));
        (
            MemoryPipe {
                inbound: Arc::clone(&a),
                outbound: Arc::clone(&b),
            },
            MemoryPipe {
                inbound: b,
                outbound: a,
            },
        )
    }
}

impl Read for MemoryPipe {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut channel = self.inbound.lock().unwrap();
        if channel.data.is_empty() {
            return if channel.closed {
                Ok(0)
            } else {
                Err(io::ErrorKind::WouldBlock.into())
            };
        }
        channel.data.read(buf)
    }
}

impl Write for MemoryPipe {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut channel = self.outbound.lock().unwrap();
        if channel.closed {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        channel.data.extend(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Socket for MemoryPipe {
    fn shutdown(&mut self) -> io::Result<()> {
        self.outbound.lock().unwrap().closed = true;
        Ok(())
    }
}

impl Drop for MemoryPipe {
    fn drop(&mut self) {
        if let Ok(mut channel) = self.outbound.lock() {
            channel.closed = true;
        }
    }
}

/// Client and server configs sharing one self-signed `localhost` cert.
pub(crate) fn configs() -> (Arc<ClientConfig>, Arc<ServerConfig>) {
    let rcgen::CertifiedKey { cert, key_pair } =
        rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let cert_der = cert.der().clone();
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));

    let mut roots = RootCertStore::empty();
    roots.add(cert_der.clone()).unwrap();
    let client = client_config(roots).unwrap();

    let server =
        ServerConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_no_client_auth()
            .with_single_cert(vec![cert_der], key)
            .unwrap();
    (client, Arc::new(server))
}

pub(crate) fn rustls_pair() -> (RustlsEngine, RustlsEngine) {
    let (client, server) = configs();
    (
        RustlsEngine::client(client, "localhost").unwrap(),
        RustlsEngine::server(server).unwrap(),
    )
}
