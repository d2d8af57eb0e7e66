//! # Engine Contract
//!
//! Storage operations the protocol handlers rely on, expressed as plain
//! requests and outcome enums.

use std::sync::Arc;
use std::time::Duration;

/// A live item as seen by readers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub value: Arc<[u8]>,
    pub flags: u32,
    pub cas: u64,
}

/// How a store request treats an existing (or missing) item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    /// Unconditional write.
    Set,
    /// Only if the key is absent.
    Add,
    /// Only if the key is present.
    Replace,
    /// Concatenate after the current value; the key must exist.
    Append,
    /// Concatenate before the current value; the key must exist.
    Prepend,
}

/// A single store request.
///
/// `cas == 0` means unconditional; any other value must match the item's
/// current CAS.
#[derive(Debug, Clone, Copy)]
pub struct StoreRequest<'a> {
    pub mode: StoreMode,
    pub key: &'a [u8],
    pub value: &'a [u8],
    pub flags: u32,
    pub ttl: Option<Duration>,
    pub cas: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    Stored { cas: u64 },
    /// Append/prepend target is missing.
    NotStored,
    /// CAS mismatch, or `Add` on an existing key.
    Exists,
    /// CAS supplied (or `Replace`) for a missing key.
    NotFound,
    /// Resulting value exceeds the item size limit.
    TooLarge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
    /// CAS supplied and it did not match.
    Exists,
}

/// Increment or decrement request.
#[derive(Debug, Clone, Copy)]
pub struct CounterRequest<'a> {
    pub key: &'a [u8],
    pub delta: u64,
    pub increment: bool,
    /// Value to create the counter with when the key is absent.
    pub initial: Option<u64>,
    pub ttl: Option<Duration>,
    pub cas: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterOutcome {
    Value { value: u64, cas: u64 },
    NotFound,
    /// Current value is not a decimal number.
    NonNumeric,
    Exists,
}

/// Storage operations required by the reference node.
pub trait CacheEngine: Send + Sync {
    fn get(&self, key: &[u8]) -> Option<Item>;

    fn store(&self, request: StoreRequest<'_>) -> StoreOutcome;

    fn delete(&self, key: &[u8], cas: u64) -> DeleteOutcome;

    fn counter(&self, request: CounterRequest<'_>) -> CounterOutcome;

    /// Removes every item.
    fn flush(&self);
}
