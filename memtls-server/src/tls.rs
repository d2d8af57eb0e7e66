//! # Reloadable TLS Identity
//!
//! Purpose: Serve TLS from PEM files and swap in a fresh certificate/key
//! pair without restarting the listener.
//!
//! ## Design Principles
//! 1. **Read-Copy-Update**: the active `ServerConfig` sits in an `ArcSwap`;
//!    each accept takes a snapshot, so established sessions keep theirs.
//! 2. **Validate Before Swap**: a reload that fails to parse leaves the
//!    current identity in place.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;
use tracing::{info, warn};

use crate::config::TlsFiles;
use crate::error::{ServerError, ServerResult};

/// Hot-swappable TLS server configuration bound to two PEM files.
pub struct CertReloader {
    cert_path: PathBuf,
    key_path: PathBuf,
    current: ArcSwap<ServerConfig>,
}

impl CertReloader {
    pub fn load(files: &TlsFiles) -> ServerResult<Self> {
        let config = load_server_config(&files.cert_path, &files.key_path)?;
        Ok(CertReloader {
            cert_path: files.cert_path.clone(),
            key_path: files.key_path.clone(),
            current: ArcSwap::from_pointee(config),
        })
    }

    /// Re-reads both files and replaces the active configuration.
    pub fn reload(&self) -> ServerResult<()> {
        match load_server_config(&self.cert_path, &self.key_path) {
            Ok(config) => {
                self.current.store(Arc::new(config));
                info!(cert = %self.cert_path.display(), "tls certificate reloaded");
                Ok(())
            }
            Err(err) => {
                warn!(%err, "tls certificate reload failed; keeping current identity");
                Err(err)
            }
        }
    }

    pub fn snapshot(&self) -> Arc<ServerConfig> {
        self.current.load_full()
    }

    /// Runs the server side of a handshake with the current identity.
    pub async fn accept<IO>(&self, stream: IO) -> std::io::Result<TlsStream<IO>>
    where
        IO: AsyncRead + AsyncWrite + Unpin,
    {
        TlsAcceptor::from(self.snapshot()).accept(stream).await
    }
}

impl fmt::Debug for CertReloader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertReloader")
            .field("cert_path", &self.cert_path)
            .field("key_path", &self.key_path)
            .finish_non_exhaustive()
    }
}

fn pem_error(path: &Path, err: impl fmt::Display) -> ServerError {
    ServerError::Pem {
        path: path.display().to_string(),
        reason: err.to_string(),
    }
}

/// Builds a rustls server config from a PEM certificate chain and key.
pub fn load_server_config(cert_path: &Path, key_path: &Path) -> ServerResult<ServerConfig> {
    let chain = CertificateDer::pem_file_iter(cert_path)
        .map_err(|err| pem_error(cert_path, err))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| pem_error(cert_path, err))?;
    if chain.is_empty() {
        return Err(pem_error(cert_path, "no certificates found"));
    }
    let key = PrivateKeyDer::from_pem_file(key_path).map_err(|err| pem_error(key_path, err))?;

    let config =
        ServerConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()?
            .with_no_client_auth()
            .with_single_cert(chain, key)?;
    Ok(config)
}
