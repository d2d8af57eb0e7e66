//! # memtls Reference Node
//!
//! Purpose: A small cache node speaking the memcached binary and text
//! protocols, over plaintext or TLS, for exercising the client end to end.
//!
//! ## Design Principles
//! 1. **Protocol Sniffing**: the first byte of a connection picks binary
//!    (`0x80`) or text framing.
//! 2. **Engine Behind a Trait**: handlers see `CacheEngine`, not the store.
//! 3. **Hot Identity**: the TLS certificate can be reloaded in place with
//!    `refresh_certs`.

pub mod binary;
pub mod config;
pub mod error;
pub mod server;
pub mod text;
pub mod tls;

pub use config::{ServerConfig, TlsFiles};
pub use error::{ServerError, ServerResult};
pub use server::{handle_connection, NodeContext, Server};
pub use tls::{load_server_config, CertReloader};
