//! # In-Memory Engine
//!
//! Provide the in-memory backend with sharded locking, TTL-aware lookups
//! and CAS versioning for the reference cache node.
//!
//! ## Usage
//!
//! - Use `MemoryEngine::new()` for a default sharded engine with the standard
//!   1 MiB item limit.
//! - Use `MemoryEngine::with_config` to set the shard count or a smaller item
//!   limit (tests use this to provoke too-large rejections cheaply).
//! - Use `start_expirer` to enable active TTL cleanup in the background.
//!
//! ## Design Principles
//!
//! 1. **Sharded Locks**: Per-shard locks reduce contention under concurrency.
//! 2. **Global CAS Counter**: Every successful mutation draws a fresh CAS from
//!    one atomic, so tokens are unique across shards.
//! 3. **Arc-backed Buffers**: Values are `Arc<[u8]>` to avoid extra copies.
//! 4. **TTL Fast Path**: Expiration is checked on access; the sweeper only
//!    reclaims memory.
//!
//! ## Structure Overview
//!
//! ```text
//! MemoryEngine
//!   ├── shards: Vec<Shard>
//!   │     └── Shard
//!   │           └── map: RwLock<HashMap<Arc<[u8]>, Entry>>
//!   │                 └── Entry { value, flags, cas, expires_at }
//!   └── next_cas: AtomicU64
//! ```

use std::hash::{BuildHasher, Hasher};
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use ahash::RandomState;
use hashbrown::HashMap;
use parking_lot::RwLock;
use tracing::debug;

use crate::engine::{
    CacheEngine, CounterOutcome, CounterRequest, DeleteOutcome, Item, StoreMode, StoreOutcome,
    StoreRequest,
};

/// Default shards = CPU count * multiplier to reduce lock contention.
const DEFAULT_SHARD_MULTIPLIER: usize = 4;

/// Largest value accepted by default (1 MiB).
pub const DEFAULT_MAX_ITEM_SIZE: usize = 1024 * 1024;

/// Engine sizing.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Requested shard count, rounded up to a power of two.
    pub shards: usize,
    /// Largest value the engine stores.
    pub max_item_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let threads = std::thread::available_parallelism()
            .map(|count| count.get())
            .unwrap_or(1);
        EngineConfig {
            shards: threads.saturating_mul(DEFAULT_SHARD_MULTIPLIER),
            max_item_size: DEFAULT_MAX_ITEM_SIZE,
        }
    }
}

#[derive(Debug)]
struct Entry {
    value: Arc<[u8]>,
    flags: u32,
    cas: u64,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        match self.expires_at {
            Some(deadline) => now >= deadline,
            None => false,
        }
    }

    fn to_item(&self) -> Item {
        Item {
            value: Arc::clone(&self.value),
            flags: self.flags,
            cas: self.cas,
        }
    }
}

#[derive(Debug)]
struct Shard {
    map: RwLock<HashMap<Arc<[u8]>, Entry, RandomState>>,
}

/// Sharded in-memory implementation of `CacheEngine`.
#[derive(Debug)]
pub struct MemoryEngine {
    shards: Vec<Shard>,
    /// Bitmask for fast shard selection (power-of-two shard count).
    shard_mask: usize,
    hash_state: RandomState,
    max_item_size: usize,
    next_cas: AtomicU64,
}

/// Handle for the background expiration sweeper.
///
/// Call `stop` to signal shutdown and join the thread.
pub struct ExpirationHandle {
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ExpirationHandle {
    /// Stops the sweeper and waits for the thread to finish.
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEngine {
    /// Creates an engine with default shard count and item limit.
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// Creates an engine with explicit sizing.
    pub fn with_config(config: EngineConfig) -> Self {
        let shard_count = normalize_shard_count(config.shards);
        let hash_state = RandomState::new();
        let shards = (0..shard_count)
            .map(|_| Shard {
                map: RwLock::new(HashMap::with_hasher(hash_state.clone())),
            })
            .collect();

        MemoryEngine {
            shards,
            shard_mask: shard_count - 1,
            hash_state,
            max_item_size: config.max_item_size,
            next_cas: AtomicU64::new(1),
        }
    }

    #[inline]
    pub fn max_item_size(&self) -> usize {
        self.max_item_size
    }

    /// Removes expired entries across all shards.
    ///
    /// This is an O(n) scan and is intended for a periodic background sweep.
    pub fn purge_expired(&self, now: Instant) -> usize {
        let mut removed = 0;
        for shard in &self.shards {
            let mut map = shard.map.write();
            let before = map.len();
            map.retain(|_, entry| !entry.is_expired(now));
            removed += before - map.len();
        }
        if removed > 0 {
            debug!(removed, "purged expired items");
        }
        removed
    }

    /// Starts a background thread that periodically removes expired entries.
    ///
    /// The returned handle must be stopped to avoid leaking the thread.
    pub fn start_expirer(self: &Arc<Self>, interval: Duration) -> ExpirationHandle {
        let interval = if interval.is_zero() {
            Duration::from_millis(1)
        } else {
            interval
        };

        let stop = Arc::new(AtomicBool::new(false));
        let stop_thread = Arc::clone(&stop);
        let engine = Arc::clone(self);

        let join = std::thread::spawn(move || {
            while !stop_thread.load(Ordering::Acquire) {
                std::thread::sleep(interval);
                engine.purge_expired(Instant::now());
            }
        });

        ExpirationHandle {
            stop,
            join: Some(join),
        }
    }

    fn shard_for(&self, key: &[u8]) -> &Shard {
        let mut hasher = self.hash_state.build_hasher();
        hasher.write(key);
        &self.shards[(hasher.finish() as usize) & self.shard_mask]
    }

    fn next_cas(&self) -> u64 {
        self.next_cas.fetch_add(1, Ordering::Relaxed)
    }

    fn deadline(ttl: Option<Duration>, now: Instant) -> Option<Instant> {
        ttl.map(|ttl| now + ttl)
    }
}

impl CacheEngine for MemoryEngine {
    fn get(&self, key: &[u8]) -> Option<Item> {
        let now = Instant::now();
        let map = self.shard_for(key).map.read();
        map.get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(Entry::to_item)
    }

    fn store(&self, request: StoreRequest<'_>) -> StoreOutcome {
        let now = Instant::now();
        let mut map = self.shard_for(request.key).map.write();

        let live = map
            .get(request.key)
            .filter(|entry| !entry.is_expired(now));

        if let Some(entry) = live {
            if request.cas != 0 && entry.cas != request.cas {
                return StoreOutcome::Exists;
            }
        } else if request.cas != 0 {
            return StoreOutcome::NotFound;
        }

        let (value, flags, expires_at): (Arc<[u8]>, u32, Option<Instant>) =
            match (request.mode, live) {
                (StoreMode::Add, Some(_)) => return StoreOutcome::Exists,
                (StoreMode::Replace, None) => return StoreOutcome::NotFound,
                (StoreMode::Append | StoreMode::Prepend, None) => return StoreOutcome::NotStored,
                (StoreMode::Append, Some(entry)) => {
                    if entry.value.len() + request.value.len() > self.max_item_size {
                        return StoreOutcome::TooLarge;
                    }
                    let mut joined = Vec::with_capacity(entry.value.len() + request.value.len());
                    joined.extend_from_slice(&entry.value);
                    joined.extend_from_slice(request.value);
                    (Arc::from(joined), entry.flags, entry.expires_at)
                }
                (StoreMode::Prepend, Some(entry)) => {
                    if entry.value.len() + request.value.len() > self.max_item_size {
                        return StoreOutcome::TooLarge;
                    }
                    let mut joined = Vec::with_capacity(entry.value.len() + request.value.len());
                    joined.extend_from_slice(request.value);
                    joined.extend_from_slice(&entry.value);
                    (Arc::from(joined), entry.flags, entry.expires_at)
                }
                (StoreMode::Set | StoreMode::Add | StoreMode::Replace, _) => {
                    if request.value.len() > self.max_item_size {
                        return StoreOutcome::TooLarge;
                    }
                    (
                        Arc::from(request.value),
                        request.flags,
                        Self::deadline(request.ttl, now),
                    )
                }
            };

        let cas = self.next_cas();
        map.insert(
            Arc::from(request.key),
            Entry {
                value,
                flags,
                cas,
                expires_at,
            },
        );
        StoreOutcome::Stored { cas }
    }

    fn delete(&self, key: &[u8], cas: u64) -> DeleteOutcome {
        let now = Instant::now();
        let mut map = self.shard_for(key).map.write();

        let current = match map.get(key) {
            Some(entry) if !entry.is_expired(now) => entry.cas,
            Some(_) => {
                map.remove(key);
                return DeleteOutcome::NotFound;
            }
            None => return DeleteOutcome::NotFound,
        };

        if cas != 0 && cas != current {
            return DeleteOutcome::Exists;
        }
        map.remove(key);
        DeleteOutcome::Deleted
    }

    fn counter(&self, request: CounterRequest<'_>) -> CounterOutcome {
        let now = Instant::now();
        let mut map = self.shard_for(request.key).map.write();

        let existing = map
            .get(request.key)
            .filter(|entry| !entry.is_expired(now));

        let (value, flags, expires_at) = match existing {
            None => match request.initial {
                Some(initial) if request.cas == 0 => {
                    (initial, 0, Self::deadline(request.ttl, now))
                }
                _ => return CounterOutcome::NotFound,
            },
            Some(entry) => {
                if request.cas != 0 && entry.cas != request.cas {
                    return CounterOutcome::Exists;
                }
                let current = match parse_counter(&entry.value) {
                    Some(current) => current,
                    None => return CounterOutcome::NonNumeric,
                };
                let next = if request.increment {
                    current.wrapping_add(request.delta)
                } else {
                    current.saturating_sub(request.delta)
                };
                (next, entry.flags, entry.expires_at)
            }
        };

        let cas = self.next_cas();
        map.insert(
            Arc::from(request.key),
            Entry {
                value: Arc::from(value.to_string().into_bytes()),
                flags,
                cas,
                expires_at,
            },
        );
        CounterOutcome::Value { value, cas }
    }

    fn flush(&self) {
        for shard in &self.shards {
            shard.map.write().clear();
        }
    }
}

fn parse_counter(data: &[u8]) -> Option<u64> {
    std::str::from_utf8(data).ok()?.trim().parse().ok()
}

/// Normalizes shard counts to a power of two for fast masking.
fn normalize_shard_count(count: usize) -> usize {
    count.max(1).next_power_of_two()
}
