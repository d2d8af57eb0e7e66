//! # memtls Storage Engine
//!
//! Purpose: Back the reference cache node with a CAS-aware in-memory store.
//!
//! ## Design Principles
//! 1. **Strategy Pattern**: `CacheEngine` decouples the protocol handlers
//!    from the storage implementation.
//! 2. **Explicit Outcomes**: every mutation reports a precise outcome enum so
//!    each wire protocol can pick its own status text.
//! 3. **Monotonic CAS**: one global counter versions every mutation.

mod engine;
mod memory;

pub use engine::{
    CacheEngine, CounterOutcome, CounterRequest, DeleteOutcome, Item, StoreMode, StoreOutcome,
    StoreRequest,
};
pub use memory::{EngineConfig, ExpirationHandle, MemoryEngine, DEFAULT_MAX_ITEM_SIZE};
