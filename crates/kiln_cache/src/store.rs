//! The cache storage trait and the in-memory backend.

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;

use crate::error::CacheError;
use crate::key::CacheKey;

/// Storage for cached compilation payloads.
///
/// Implementations must be safe under concurrent access. Writers do not lock
/// per key: when two identical requests race, both write and the last write
/// wins, which is fine because equal keys map to equivalent values.
pub trait ResultCache: Send + Sync {
    /// Returns the payload stored under `key`, or `None` on a miss.
    ///
    /// Corrupt entries are reported as misses.
    fn get(&self, key: &CacheKey) -> Option<Vec<u8>>;

    /// Stores `data` under `key`, replacing any previous value.
    fn put(&self, key: &CacheKey, data: &[u8]) -> Result<(), CacheError>;
}

/// Process-local cache bounded by total payload size.
///
/// When an insertion would exceed the byte budget, the oldest entries are
/// evicted first. A single payload larger than the budget is not stored.
pub struct MemoryCache {
    inner: RwLock<MemoryInner>,
    max_bytes: usize,
}

#[derive(Default)]
struct MemoryInner {
    entries: HashMap<CacheKey, Vec<u8>>,
    order: VecDeque<CacheKey>,
    bytes: usize,
}

impl MemoryCache {
    /// Default byte budget: 256 MiB.
    pub const DEFAULT_MAX_BYTES: usize = 256 * 1024 * 1024;

    /// Creates an empty cache with the default byte budget.
    pub fn new() -> Self {
        Self::with_max_bytes(Self::DEFAULT_MAX_BYTES)
    }

    /// Creates an empty cache holding at most `max_bytes` of payload.
    pub fn with_max_bytes(max_bytes: usize) -> Self {
        Self {
            inner: RwLock::new(MemoryInner::default()),
            max_bytes,
        }
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total payload bytes currently stored.
    pub fn bytes(&self) -> usize {
        self.inner.read().bytes
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultCache for MemoryCache {
    fn get(&self, key: &CacheKey) -> Option<Vec<u8>> {
        self.inner.read().entries.get(key).cloned()
    }

    fn put(&self, key: &CacheKey, data: &[u8]) -> Result<(), CacheError> {
        if data.len() > self.max_bytes {
            tracing::debug!(key = %key, size = data.len(), "payload exceeds memory cache budget");
            return Ok(());
        }

        let mut inner = self.inner.write();
        if let Some(old) = inner.entries.remove(key) {
            inner.bytes -= old.len();
            inner.order.retain(|k| k != key);
        }

        while inner.bytes + data.len() > self.max_bytes {
            let Some(oldest) = inner.order.pop_front() else {
                break;
            };
            if let Some(evicted) = inner.entries.remove(&oldest) {
                inner.bytes -= evicted.len();
            }
        }

        inner.bytes += data.len();
        inner.order.push_back(*key);
        inner.entries.insert(*key, data.to_vec());
        Ok(())
    }
}
