//! LRU cache of active code records.
//!
//! Process-local, low-latency store keyed by transaction id. It is the
//! authoritative tier for security counters: every verification attempt
//! consults it without extra I/O, so counter mutations land here first.

use crate::record::CodeRecord;
use chrono::{DateTime, Utc};
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Default cache capacity.
const DEFAULT_CACHE_CAPACITY: usize = 10_000;

/// LRU cache of active code records keyed by transaction id.
///
/// All mutations run under one mutex, so a read-modify-write done through
/// [`CodeCache::update`] or [`CodeCache::upsert_with`] is atomic with
/// respect to other cache users.
#[derive(Clone)]
pub struct CodeCache {
    inner: Arc<Mutex<LruCache<String, CodeRecord>>>,
    stats: Arc<Mutex<CacheStats>>,
}

/// Cache statistics for monitoring.
#[derive(Debug, Default, Clone)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of entries added or replaced.
    pub additions: u64,
    /// Number of expired entries removed by the lazy sweep.
    pub swept: u64,
}

impl CacheStats {
    /// Calculate hit rate as a percentage.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

impl CodeCache {
    /// Create a new cache with default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CACHE_CAPACITY)
    }

    /// Create a new cache with the specified capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Arc::new(Mutex::new(LruCache::new(cap))),
            stats: Arc::new(Mutex::new(CacheStats::default())),
        }
    }

    /// Fetch the record for a transaction, if cached.
    pub fn get(&self, transaction_id: &str) -> Option<CodeRecord> {
        let mut cache = self.inner.lock();
        let found = cache.get(transaction_id).cloned();

        let mut stats = self.stats.lock();
        if found.is_some() {
            stats.hits += 1;
        } else {
            stats.misses += 1;
        }

        found
    }

    /// Insert or replace a record.
    pub fn insert(&self, record: CodeRecord) {
        let mut cache = self.inner.lock();
        cache.put(record.transaction_id.clone(), record);

        let mut stats = self.stats.lock();
        stats.additions += 1;
    }

    /// Mutate a cached record in place, returning the updated copy.
    ///
    /// Returns `None` when the transaction is not cached. The closure
    /// runs under the cache lock.
    pub fn update<F>(&self, transaction_id: &str, mutate: F) -> Option<CodeRecord>
    where
        F: FnOnce(&mut CodeRecord),
    {
        let mut cache = self.inner.lock();
        let record = cache.get_mut(transaction_id)?;
        mutate(record);
        Some(record.clone())
    }

    /// Insert a record derived from whatever is currently cached for the
    /// same transaction, atomically.
    ///
    /// The closure receives the existing entry (if any) and returns the
    /// record to store; resolution uses this to apply the counter-max
    /// merge without a read/write race.
    pub fn upsert_with<F>(&self, transaction_id: &str, resolve: F) -> CodeRecord
    where
        F: FnOnce(Option<&CodeRecord>) -> CodeRecord,
    {
        let mut cache = self.inner.lock();
        let merged = resolve(cache.peek(transaction_id));
        cache.put(transaction_id.to_string(), merged.clone());

        let mut stats = self.stats.lock();
        stats.additions += 1;

        merged
    }

    /// Remove a record, returning it if present.
    pub fn remove(&self, transaction_id: &str) -> Option<CodeRecord> {
        self.inner.lock().pop(transaction_id)
    }

    /// Drop every record past its expiry. Returns how many were removed.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let mut cache = self.inner.lock();
        let expired: Vec<String> = cache
            .iter()
            .filter(|(_, record)| record.is_expired(now))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            cache.pop(id);
        }

        let mut stats = self.stats.lock();
        stats.swept += expired.len() as u64;

        expired.len()
    }

    /// Get current cache statistics.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.stats.lock().clone()
    }

    /// Get the current number of entries in the cache.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Check if the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Clear all entries from the cache.
    pub fn clear(&self) {
        self.inner.lock().clear();
    }
}

impl Default for CodeCache {
    fn default() -> Self {
        Self::new()
    }
}
