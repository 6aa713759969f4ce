//! Cache Statistics Module
//!
//! Tracks engine-level hits, misses, sets and deletes.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::backend::{BackendKind, BackendMetrics};

// == Counters ==
/// Process-wide counters shared by all concurrent callers.
#[derive(Debug, Default)]
pub struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
}

impl CacheCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_set(&self) {
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delete(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    /// Zeroes every counter.
    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.sets.store(0, Ordering::Relaxed);
        self.deletes.store(0, Ordering::Relaxed);
    }

    /// Builds a snapshot combined with backend information.
    pub fn snapshot(&self, backend: BackendKind, backend_metrics: BackendMetrics) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        CacheStats {
            hits,
            misses,
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            hit_rate: hit_rate(hits, misses),
            total_requests: hits + misses,
            backend,
            backend_metrics,
        }
    }
}

// == Cache Stats ==
/// Read-only snapshot of cache activity.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    /// Number of successful retrievals
    pub hits: u64,
    /// Number of retrievals that found nothing (or failed)
    pub misses: u64,
    /// Number of successful writes
    pub sets: u64,
    /// Number of successful deletes
    pub deletes: u64,
    /// hits / (hits + misses), or 0.0 if no requests have been made
    pub hit_rate: f64,
    /// hits + misses
    pub total_requests: u64,
    /// Active backend
    pub backend: BackendKind,
    /// Backend-specific metrics
    pub backend_metrics: BackendMetrics,
}

/// Calculates the hit rate as a fraction in `[0, 1]`.
pub fn hit_rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn snapshot(counters: &CacheCounters) -> CacheStats {
        counters.snapshot(BackendKind::Local, BackendMetrics::default())
    }

    #[test]
    fn test_counters_new() {
        let stats = snapshot(&CacheCounters::new());
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.sets, 0);
        assert_eq!(stats.deletes, 0);
        assert_eq!(stats.total_requests, 0);
    }

    #[test]
    fn test_hit_rate_no_requests() {
        assert_eq!(hit_rate(0, 0), 0.0);
    }

    #[test]
    fn test_hit_rate_mixed() {
        let counters = CacheCounters::new();
        counters.record_hit();
        counters.record_hit();
        counters.record_hit();
        counters.record_miss();

        let stats = snapshot(&counters);
        assert_eq!(stats.hit_rate, 0.75);
        assert_eq!(stats.total_requests, 4);
    }

    #[test]
    fn test_reset() {
        let counters = CacheCounters::new();
        counters.record_hit();
        counters.record_set();
        counters.record_delete();
        counters.reset();

        let stats = snapshot(&counters);
        assert_eq!(stats.hits + stats.sets + stats.deletes, 0);
    }

    #[test]
    fn test_concurrent_updates_are_not_lost() {
        let counters = Arc::new(CacheCounters::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let counters = counters.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        counters.record_hit();
                        counters.record_miss();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let stats = snapshot(&counters);
        assert_eq!(stats.hits, 8000);
        assert_eq!(stats.misses, 8000);
    }

    #[test]
    fn test_snapshot_serialize() {
        let stats = snapshot(&CacheCounters::new());
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["backend"], "local");
        assert!(json.get("hit_rate").is_some());
        assert!(json.get("backend_metrics").is_some());
    }
}
