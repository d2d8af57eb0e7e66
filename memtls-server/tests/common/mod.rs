#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;

use memtls_client::{client_config, CacheClient, ClientConfig};
use memtls_common::{ConnectionConfig, WireProtocol};
use memtls_server::{Server, ServerConfig, TlsFiles};
use rustls::pki_types::CertificateDer;
use rustls::RootCertStore;

/// Runs a node on its own runtime thread and returns its address.
pub fn spawn_node(mut config: ServerConfig) -> SocketAddr {
    config.listen_addr = "127.0.0.1:0".to_string();
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .expect("runtime");
        runtime.block_on(async move {
            let server = Server::bind(&config).await.expect("bind");
            tx.send(server.local_addr().expect("addr")).expect("send addr");
            server.run().await.expect("serve");
        });
    });
    rx.recv().expect("server start")
}

pub fn connection(protocol: WireProtocol) -> ConnectionConfig {
    ConnectionConfig {
        protocol,
        operation_timeout_ms: 5_000,
        ..ConnectionConfig::default()
    }
}

pub fn plain_client(addr: SocketAddr, protocol: WireProtocol) -> CacheClient {
    CacheClient::with_config(ClientConfig {
        addr: addr.to_string(),
        connection: connection(protocol),
        ..ClientConfig::default()
    })
    .expect("client")
}

/// Self-signed `localhost` identity written to PEM files.
pub struct Identity {
    pub files: TlsFiles,
    pub cert: CertificateDer<'static>,
}

pub fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("memtls-{}-{}", std::process::id(), name));
    std::fs::create_dir_all(&dir).expect("scratch dir");
    dir
}

pub fn write_identity(dir: &PathBuf) -> Identity {
    let rcgen::CertifiedKey { cert, key_pair } =
        rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).expect("cert");
    let files = TlsFiles {
        cert_path: dir.join("node.crt"),
        key_path: dir.join("node.key"),
    };
    std::fs::write(&files.cert_path, cert.pem()).expect("write cert");
    std::fs::write(&files.key_path, key_pair.serialize_pem()).expect("write key");
    Identity {
        files,
        cert: cert.der().clone(),
    }
}

pub fn tls_client(addr: SocketAddr, protocol: WireProtocol, trusted: &[&Identity]) -> CacheClient {
    let mut roots = RootCertStore::empty();
    for identity in trusted {
        roots.add(identity.cert.clone()).expect("trust cert");
    }
    let mut connection = connection(protocol);
    connection.tls = true;
    connection.server_name = Some("localhost".to_string());
    CacheClient::with_config(ClientConfig {
        addr: addr.to_string(),
        connection,
        tls: Some(client_config(roots).expect("client tls config")),
        ..ClientConfig::default()
    })
    .expect("client")
}

pub fn tls_node(identity: &Identity) -> SocketAddr {
    spawn_node(ServerConfig {
        tls: Some(identity.files.clone()),
        ..ServerConfig::default()
    })
}

