//! Bounded hash cache with TTL and max-size eviction
//!
//! Remembers which source transactions this process already forwarded so a
//! long-running aggregation watcher does not submit the same withdrawal
//! twice, without growing without bound.
//!
//! Each entry is ~40 bytes (32-byte key + 8-byte Instant), so the default
//! 100k entries is about 4 MB.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use alloy::primitives::B256;

pub const DEFAULT_FINALIZED_CACHE_SIZE: usize = 100_000;
pub const DEFAULT_FINALIZED_CACHE_TTL_SECS: u64 = 86_400; // 24 hours

/// Bounded set of 32-byte hashes
///
/// - **Max capacity:** when full, the oldest entry is evicted on insert.
/// - **TTL:** expired entries are dropped before each insertion.
pub struct BoundedHashCache {
    map: HashMap<B256, Instant>,
    max_size: usize,
    ttl: Duration,
}

impl BoundedHashCache {
    pub fn new(max_size: usize, ttl_secs: u64) -> Self {
        Self {
            map: HashMap::new(),
            max_size,
            ttl: Duration::from_secs(ttl_secs),
        }
    }

    pub fn contains(&self, hash: &B256) -> bool {
        self.map.get(hash).is_some_and(|&t| t.elapsed() < self.ttl)
    }

    pub fn insert(&mut self, hash: B256) {
        let now = Instant::now();
        self.map.retain(|_, &mut t| now.duration_since(t) < self.ttl);
        while self.map.len() >= self.max_size && !self.map.is_empty() {
            let oldest = self.map.iter().min_by_key(|(_, t)| **t).map(|(h, _)| *h);
            if let Some(h) = oldest {
                self.map.remove(&h);
            } else {
                break;
            }
        }
        self.map.insert(hash, now);
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl Default for BoundedHashCache {
    fn default() -> Self {
        Self::new(DEFAULT_FINALIZED_CACHE_SIZE, DEFAULT_FINALIZED_CACHE_TTL_SECS)
    }
}
