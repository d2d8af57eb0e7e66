//! # TCP Server
//!
//! Accept cache connections, optionally terminate TLS, detect the wire
//! protocol from the first byte and dispatch requests to the engine.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use memtls_common::protocol::REQUEST_MAGIC;
use memtls_engine::{ExpirationHandle, MemoryEngine};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::binary;
use crate::config::ServerConfig;
use crate::error::ServerResult;
use crate::text::{self, Flow};
use crate::tls::CertReloader;

/// State shared by every connection of one node.
#[derive(Debug)]
pub struct NodeContext {
    pub engine: Arc<MemoryEngine>,
    /// Present when the node serves TLS.
    pub certs: Option<Arc<CertReloader>>,
    pub version: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Protocol {
    Binary,
    Text,
}

impl Protocol {
    fn detect(first: u8) -> Self {
        if first == REQUEST_MAGIC {
            Protocol::Binary
        } else {
            Protocol::Text
        }
    }
}

/// A bound, not yet running, cache node.
pub struct Server {
    listener: TcpListener,
    node: Arc<NodeContext>,
    expirer: Option<ExpirationHandle>,
}

impl Server {
    pub async fn bind(config: &ServerConfig) -> ServerResult<Self> {
        config.validate()?;
        let certs = match &config.tls {
            Some(files) => Some(Arc::new(CertReloader::load(files)?)),
            None => None,
        };
        let engine = Arc::new(MemoryEngine::with_config(config.engine_config()));
        let expirer = engine.start_expirer(config.expiry_sweep());
        let listener = TcpListener::bind(&config.listen_addr).await?;
        info!(
            addr = %listener.local_addr()?,
            tls = certs.is_some(),
            max_item_size = config.max_item_size,
            "cache node bound"
        );
        Ok(Server {
            listener,
            node: Arc::new(NodeContext {
                engine,
                certs,
                version: config.version.clone(),
            }),
            expirer: Some(expirer),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn node(&self) -> &Arc<NodeContext> {
        &self.node
    }

    /// Serves until the process ends.
    pub async fn run(self) -> ServerResult<()> {
        self.run_until(std::future::pending()).await
    }

    /// Serves until `shutdown` resolves. Connections already accepted keep
    /// running on their own tasks.
    pub async fn run_until<F>(mut self, shutdown: F) -> ServerResult<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(err) => {
                            warn!(%err, "accept failed");
                            continue;
                        }
                    };
                    let node = Arc::clone(&self.node);
                    tokio::spawn(async move {
                        if let Err(err) = serve(stream, peer, node).await {
                            debug!(%peer, %err, "connection ended with error");
                        }
                    });
                }
            }
        }

        info!("cache node shutting down");
        if let Some(expirer) = self.expirer.take() {
            // Joining sleeps for up to one sweep interval.
            if let Err(err) = tokio::task::spawn_blocking(move || expirer.stop()).await {
                warn!(%err, "expiry sweeper did not stop cleanly");
            }
        }
        Ok(())
    }
}

async fn serve(stream: TcpStream, peer: SocketAddr, node: Arc<NodeContext>) -> io::Result<()> {
    // Disable Nagle to keep reply latency low for small payloads.
    stream.set_nodelay(true)?;
    debug!(%peer, "accepted connection");
    match node.certs.clone() {
        Some(certs) => {
            let stream = certs.accept(stream).await?;
            debug!(%peer, "tls handshake complete");
            handle_connection(stream, node).await
        }
        None => handle_connection(stream, node).await,
    }
}

/// Handles a single client connection until it closes or quits.
pub async fn handle_connection<S>(mut stream: S, node: Arc<NodeContext>) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut input = BytesMut::with_capacity(8 * 1024);
    let mut out = BytesMut::with_capacity(8 * 1024);
    let mut protocol = None;

    loop {
        let bytes = stream.read_buf(&mut input).await?;
        if bytes == 0 {
            break;
        }
        let protocol = *protocol.get_or_insert_with(|| Protocol::detect(input[0]));

        let flow = match protocol {
            Protocol::Binary => match binary::process(&mut input, &node, &mut out) {
                Ok(()) => Flow::Continue,
                Err(err) => {
                    warn!(%err, "binary protocol error; closing connection");
                    Flow::Close
                }
            },
            Protocol::Text => text::process(&mut input, &node, &mut out),
        };
        if !out.is_empty() {
            stream.write_all(&out).await?;
            out.clear();
        }
        if flow == Flow::Close {
            break;
        }
    }

    if let Err(err) = stream.shutdown().await {
        debug!(%err, "shutdown after close failed");
    }
    Ok(())
}
