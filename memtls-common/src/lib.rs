// memtls-common - Shared types and protocol definitions for memtls
//
// This crate defines the status taxonomy, wire framing and configuration
// shared by the client transport and the reference cache node.

pub mod config;
pub mod error;
pub mod protocol;
pub mod status;
pub mod types;

// Re-export for convenience
pub use config::*;
pub use error::*;
pub use protocol::*;
pub use status::*;
pub use types::*;
