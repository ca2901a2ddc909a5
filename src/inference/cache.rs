//! Bounded LRU cache of ranked results keyed by tensor content hash.
//!
//! Capacity is enforced here rather than by `lru` itself so a capacity of 0
//! is legal (every `put` is evicted at once). An optional TTL runs from the
//! moment an entry is written; reading an entry promotes it in LRU order but
//! does not extend its lifetime. Expired entries are dropped lazily on `get`
//! or in bulk by `purge_expired`.
//!
//! All operations take one short lock and never call into the model. If a
//! thread panics while holding that lock, the cache degrades to always-miss
//! rather than failing predictions.

use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use lru::LruCache;
use tracing::{debug, warn};

use super::RankedResult;
use crate::tensor::ContentHash;

struct CachedPrediction {
    result: RankedResult,
    inserted_at: Instant,
}

pub struct PredictionCache {
    entries: Mutex<LruCache<ContentHash, CachedPrediction>>,
    capacity: usize,
    ttl: Option<Duration>,
}

impl PredictionCache {
    pub fn new(capacity: usize) -> Self {
        Self::with_ttl(capacity, None)
    }

    pub fn with_ttl(capacity: usize, ttl: Option<Duration>) -> Self {
        Self {
            entries: Mutex::new(LruCache::unbounded()),
            capacity,
            ttl,
        }
    }

    /// Cached result for `key`, promoting it to most recently used.
    pub fn get(&self, key: &ContentHash) -> Option<RankedResult> {
        let mut entries = self.lock()?;

        let expired = self.is_expired(entries.peek(key)?);
        if expired {
            entries.pop(key);
            debug!(key = %key.short(), "Cache entry expired");
            return None;
        }

        entries.get(key).map(|entry| entry.result.clone())
    }

    /// Insert or replace `key`, evicting the least recently used entry when full.
    pub fn put(&self, key: ContentHash, result: RankedResult) {
        let Some(mut entries) = self.lock() else {
            return;
        };
        entries.put(
            key,
            CachedPrediction {
                result,
                inserted_at: Instant::now(),
            },
        );

        if entries.len() > self.capacity {
            if let Some((evicted, _)) = entries.pop_lru() {
                debug!(key = %evicted.short(), capacity = self.capacity, "Cache entry evicted");
            }
        }
    }

    /// Presence check that leaves LRU order and expiry untouched.
    pub fn contains(&self, key: &ContentHash) -> bool {
        self.lock().is_some_and(|entries| entries.contains(key))
    }

    pub fn clear(&self) {
        if let Some(mut entries) = self.lock() {
            entries.clear();
        }
    }

    /// Drop every expired entry now. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        if self.ttl.is_none() {
            return 0;
        }

        let Some(mut entries) = self.lock() else {
            return 0;
        };
        let expired: Vec<ContentHash> = entries
            .iter()
            .filter(|(_, entry)| self.is_expired(entry))
            .map(|(key, _)| *key)
            .collect();
        for key in &expired {
            entries.pop(key);
        }

        if !expired.is_empty() {
            debug!(removed = expired.len(), "Expired cache entries purged");
        }
        expired.len()
    }

    /// Keys from most to least recently used.
    pub fn keys_by_recency(&self) -> Vec<ContentHash> {
        self.lock()
            .map(|entries| entries.iter().map(|(key, _)| *key).collect())
            .unwrap_or_default()
    }

    pub fn size(&self) -> usize {
        self.lock().map_or(0, |entries| entries.len())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    fn is_expired(&self, entry: &CachedPrediction) -> bool {
        self.ttl
            .is_some_and(|ttl| entry.inserted_at.elapsed() >= ttl)
    }

    fn lock(&self) -> Option<MutexGuard<'_, LruCache<ContentHash, CachedPrediction>>> {
        match self.entries.lock() {
            Ok(entries) => Some(entries),
            Err(_) => {
                warn!("Prediction cache lock poisoned; bypassing cache");
                None
            }
        }
    }
}
