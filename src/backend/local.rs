//! Local Backend Module
//!
//! In-process store combining a sharded map with per-entry TTL expiration.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use crate::backend::{BackendKind, BackendMetrics, CacheBackend};
use crate::cache::entry::current_timestamp_ms;
use crate::cache::pattern::glob_match;
use crate::cache::{CacheEntry, MAX_KEY_LENGTH, MAX_VALUE_SIZE};
use crate::error::{CacheError, Result};

/// Entries inspected when choosing an eviction victim.
const EVICTION_SAMPLE: usize = 16;

/// Minimum spacing between two full expiry purges triggered by writes.
const PURGE_INTERVAL_MS: u64 = 1000;

// == Local Backend ==
/// Bounded in-process table with lazy and periodic expiration.
///
/// The map is sharded, so a sweep pass or a write only locks the shard it
/// is touching.
#[derive(Debug)]
pub struct LocalBackend {
    /// Key-value storage
    entries: DashMap<String, CacheEntry>,
    /// Maximum number of entries allowed
    max_entries: usize,
    /// Entries dropped to stay within `max_entries`
    evictions: AtomicU64,
    /// Entries removed after their TTL elapsed
    expired: AtomicU64,
    /// Last time a full expiry purge ran on the write path (Unix ms)
    last_purge_ms: AtomicU64,
}

impl LocalBackend {
    // == Constructor ==
    /// Creates a new LocalBackend holding at most `max_entries` entries.
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries: max_entries.max(1),
            evictions: AtomicU64::new(0),
            expired: AtomicU64::new(0),
            last_purge_ms: AtomicU64::new(0),
        }
    }

    // == Get ==
    /// Retrieves a live value.
    ///
    /// An expired entry found here is removed on the spot and reported as
    /// absent.
    pub fn get_entry(&self, key: &str) -> Option<String> {
        let expired = match self.entries.get(key) {
            Some(entry) if entry.is_expired() => true,
            Some(entry) => return Some(entry.value.clone()),
            None => return None,
        };

        // A concurrent set may have refreshed the key since the check
        if expired && self.entries.remove_if(key, |_, e| e.is_expired()).is_some() {
            self.expired.fetch_add(1, Ordering::Relaxed);
        }
        None
    }

    // == Set ==
    /// Stores a serialized value with a TTL in seconds.
    ///
    /// Overwriting resets the TTL. A new key that takes the table past
    /// `max_entries` makes room afterwards: expired entries go first (at most
    /// one full purge per second), then the entry closest to expiry among a
    /// small sample. The bound holds once every concurrent write returns.
    pub fn set_entry(&self, key: &str, value: String, ttl_seconds: u64) -> Result<()> {
        if key.len() > MAX_KEY_LENGTH {
            return Err(CacheError::BackendOperation(format!(
                "Key exceeds maximum length of {} bytes",
                MAX_KEY_LENGTH
            )));
        }

        if value.len() > MAX_VALUE_SIZE {
            return Err(CacheError::BackendOperation(format!(
                "Value exceeds maximum size of {} bytes",
                MAX_VALUE_SIZE
            )));
        }

        let previous = self
            .entries
            .insert(key.to_string(), CacheEntry::new(value, Some(ttl_seconds)));

        if previous.is_none() {
            self.enforce_capacity(key);
        }
        Ok(())
    }

    fn enforce_capacity(&self, inserted: &str) {
        while self.entries.len() > self.max_entries {
            if self.purge_due() && self.cleanup_expired() > 0 {
                continue;
            }
            if !self.evict_one(inserted) {
                break;
            }
        }
    }

    /// Claims the write-path purge slot if the last purge is old enough.
    fn purge_due(&self) -> bool {
        let now = current_timestamp_ms();
        let last = self.last_purge_ms.load(Ordering::Relaxed);

        now.saturating_sub(last) >= PURGE_INTERVAL_MS
            && self
                .last_purge_ms
                .compare_exchange(last, now, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
    }

    /// Evicts the sampled entry closest to expiry, never `keep`.
    ///
    /// Returns false when there is nothing else to evict.
    fn evict_one(&self, keep: &str) -> bool {
        let victim = self
            .entries
            .iter()
            .filter(|entry| entry.key() != keep)
            .take(EVICTION_SAMPLE)
            .min_by_key(|entry| entry.value().expires_at.unwrap_or(u64::MAX))
            .map(|entry| entry.key().clone());

        let Some(victim) = victim else {
            return false;
        };

        if self.entries.remove(&victim).is_some() {
            self.evictions.fetch_add(1, Ordering::Relaxed);
            debug!(key = %victim, "local cache full, evicted entry closest to expiry");
        }
        true
    }

    // == Delete ==
    /// Removes an entry by key. Returns whether it was present.
    pub fn delete_entry(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    // == Delete Matching ==
    /// Removes every key matching a glob pattern.
    pub fn delete_matching_entries(&self, pattern: &str) -> u64 {
        let mut removed = 0;
        self.entries.retain(|key, _| {
            let matched = glob_match(pattern, key);
            if matched {
                removed += 1;
            }
            !matched
        });
        removed
    }

    // == Cleanup Expired ==
    /// Removes all expired entries, shard by shard.
    ///
    /// Returns the number of entries removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = current_timestamp_ms();
        let mut removed = 0;
        self.entries.retain(|_, entry| {
            let expired = entry.is_expired_at(now);
            if expired {
                removed += 1;
            }
            !expired
        });

        self.expired.fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    /// Returns true if `key` is physically stored, expired or not.
    pub fn contains_raw(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    // == Length ==
    /// Returns the current number of stored entries, including expired ones
    /// not yet swept.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear_entries(&self) {
        self.entries.clear();
    }

    fn collect_metrics(&self) -> BackendMetrics {
        let approx_bytes = self
            .entries
            .iter()
            .map(|entry| (entry.key().len() + entry.value().approx_size()) as u64)
            .sum();

        BackendMetrics {
            entries: self.entries.len() as u64,
            evictions: self.evictions.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            approx_bytes: Some(approx_bytes),
        }
    }
}

#[async_trait]
impl CacheBackend for LocalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    fn supports_pattern_delete(&self) -> bool {
        true
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.get_entry(key))
    }

    async fn set(&self, key: &str, value: String, ttl_seconds: u64) -> Result<()> {
        self.set_entry(key, value, ttl_seconds)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.delete_entry(key);
        Ok(())
    }

    async fn delete_matching(&self, pattern: &str) -> Result<u64> {
        Ok(self.delete_matching_entries(pattern))
    }

    async fn clear(&self) -> Result<()> {
        self.clear_entries();
        Ok(())
    }

    async fn metrics(&self) -> BackendMetrics {
        self.collect_metrics()
    }
}
