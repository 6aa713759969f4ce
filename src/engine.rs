//! Cache Engine Module
//!
//! Orchestrates the policy table, the key space and the active backend, and
//! keeps the process-wide hit/miss/set/delete counters.
//!
//! Backend faults never reach callers: a failed read is a miss, a failed
//! write returns `false`. The only error surfaced is
//! [`CacheError::UnknownDataType`].

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::{BackendKind, CacheBackend, LocalBackend, RedisBackend};
use crate::cache::{CacheCounters, CacheStats, KeySpace, Params, PolicyTable};
use crate::config::{CacheMode, Config};
use crate::error::{CacheError, Result};
use crate::tasks::spawn_sweep_task;

// == Engine State ==
/// Lifecycle of a [`CacheEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    Uninitialized,
    Initializing,
    Ready,
}

impl EngineState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => EngineState::Uninitialized,
            1 => EngineState::Initializing,
            _ => EngineState::Ready,
        }
    }
}

// == Cache Engine ==
/// One engine per process, shared as `Arc<CacheEngine>`.
///
/// Every operation initializes the engine on first use, so calling
/// [`CacheEngine::init`] up front is optional. It only moves the backend
/// connection cost to startup.
pub struct CacheEngine {
    config: Config,
    policies: PolicyTable,
    counters: CacheCounters,
    state: AtomicU8,
    /// Chosen once, never switched afterwards
    backend: OnceCell<Arc<dyn CacheBackend>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl CacheEngine {
    // == Constructors ==
    /// Creates an uninitialized engine from configuration.
    pub fn new(config: Config) -> Self {
        let policies = PolicyTable::with_ttl_overrides(&config.ttl_overrides);
        Self {
            config,
            policies,
            counters: CacheCounters::new(),
            state: AtomicU8::new(EngineState::Uninitialized as u8),
            backend: OnceCell::new(),
            sweeper: Mutex::new(None),
        }
    }

    /// Creates a ready engine around an already constructed backend.
    ///
    /// No sweep task is started; the caller owns the backend's upkeep.
    pub fn with_backend(policies: PolicyTable, backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            config: Config::local(),
            policies,
            counters: CacheCounters::new(),
            state: AtomicU8::new(EngineState::Ready as u8),
            backend: OnceCell::new_with(Some(backend)),
            sweeper: Mutex::new(None),
        }
    }

    // == Init ==
    /// Selects the backend. Idempotent and safe to call concurrently.
    ///
    /// In networked mode a Redis connection is attempted; any failure falls
    /// back to the local backend. Initialization itself never fails.
    pub async fn init(&self) {
        self.backend().await;
    }

    async fn backend(&self) -> &Arc<dyn CacheBackend> {
        self.backend.get_or_init(|| self.select_backend()).await
    }

    async fn select_backend(&self) -> Arc<dyn CacheBackend> {
        self.state
            .store(EngineState::Initializing as u8, Ordering::SeqCst);

        let backend: Arc<dyn CacheBackend> = match self.config.mode {
            CacheMode::Local => {
                info!("Local cache mode selected");
                self.start_local()
            }
            CacheMode::Networked => match RedisBackend::connect(&self.config.redis).await {
                Ok(redis) => Arc::new(redis),
                Err(e) => {
                    warn!(error = %e, "Redis unavailable, falling back to local cache");
                    self.start_local()
                }
            },
        };

        self.state.store(EngineState::Ready as u8, Ordering::SeqCst);
        info!(backend = backend.kind().as_str(), "Cache engine initialized");
        backend
    }

    fn start_local(&self) -> Arc<dyn CacheBackend> {
        let local = Arc::new(LocalBackend::new(self.config.local_max_entries));
        let handle = spawn_sweep_task(&local, Duration::from_secs(self.config.sweep_interval));

        if let Ok(mut sweeper) = self.sweeper.lock() {
            if let Some(previous) = sweeper.replace(handle) {
                previous.abort();
            }
        }
        local
    }

    // == Accessors ==
    pub fn state(&self) -> EngineState {
        EngineState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn policies(&self) -> &PolicyTable {
        &self.policies
    }

    pub fn key_space(&self) -> KeySpace<'_> {
        KeySpace::new(&self.policies)
    }

    /// Builds the key an operation on `(data_type, identifier, params)` uses.
    pub fn key_for(&self, data_type: &str, identifier: &str, params: &Params) -> Result<String> {
        self.key_space().build_key(data_type, identifier, params)
    }

    pub async fn backend_kind(&self) -> BackendKind {
        self.backend().await.kind()
    }

    /// Whether pattern invalidation is exact (true) or a full clear (false).
    pub async fn supports_pattern_delete(&self) -> bool {
        self.backend().await.supports_pattern_delete()
    }

    // == Get ==
    /// Returns the cached value, or `None` on a miss.
    ///
    /// Backend failures and undecodable entries count as misses.
    pub async fn get<T: DeserializeOwned>(
        &self,
        data_type: &str,
        identifier: &str,
        params: &Params,
    ) -> Result<Option<T>> {
        let key = self.key_for(data_type, identifier, params)?;

        match self.backend().await.get(&key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => {
                    self.counters.record_hit();
                    debug!(key = %key, "cache hit");
                    Ok(Some(value))
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "undecodable cache entry treated as miss");
                    self.counters.record_miss();
                    Ok(None)
                }
            },
            Ok(None) => {
                self.counters.record_miss();
                debug!(key = %key, "cache miss");
                Ok(None)
            }
            Err(e) => {
                warn!(key = %key, error = %e, "cache read failed, treating as miss");
                self.counters.record_miss();
                Ok(None)
            }
        }
    }

    // == Set ==
    /// Stores a value under the data type's policy TTL, or `ttl_override`
    /// seconds when given and non-zero.
    ///
    /// Returns `false` if the value could not be stored.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        data_type: &str,
        identifier: &str,
        value: &T,
        params: &Params,
        ttl_override: Option<u64>,
    ) -> Result<bool> {
        let policy = self.policies.get(data_type)?;
        let key = self.key_for(data_type, identifier, params)?;
        let ttl = ttl_override
            .filter(|ttl| *ttl > 0)
            .unwrap_or(policy.ttl_seconds);

        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                let e = CacheError::from(e);
                warn!(key = %key, error = %e, "cache write skipped");
                return Ok(false);
            }
        };

        match self.backend().await.set(&key, raw, ttl).await {
            Ok(()) => {
                self.counters.record_set();
                debug!(key = %key, ttl, "cache set");
                Ok(true)
            }
            Err(e) => {
                warn!(key = %key, error = %e, "cache write failed");
                Ok(false)
            }
        }
    }

    // == Delete ==
    /// Removes one entry. Deleting an absent entry succeeds.
    pub async fn delete(&self, data_type: &str, identifier: &str, params: &Params) -> Result<bool> {
        let key = self.key_for(data_type, identifier, params)?;

        match self.backend().await.delete(&key).await {
            Ok(()) => {
                self.counters.record_delete();
                debug!(key = %key, "cache delete");
                Ok(true)
            }
            Err(e) => {
                warn!(key = %key, error = %e, "cache delete failed");
                Ok(false)
            }
        }
    }

    // == Invalidate ==
    /// Removes every entry whose key matches a glob pattern.
    ///
    /// On a backend without pattern support the whole cache is cleared.
    pub async fn invalidate_pattern(&self, pattern: &str) -> bool {
        let backend = self.backend().await;

        match backend.delete_matching(pattern).await {
            Ok(removed) => {
                if backend.supports_pattern_delete() {
                    info!(pattern, removed, "cache invalidated by pattern");
                } else {
                    info!(pattern, "cache cleared, backend has no pattern support");
                }
                true
            }
            Err(e) => {
                warn!(pattern, error = %e, "cache invalidation failed");
                false
            }
        }
    }

    /// Removes every entry of one data type.
    pub async fn invalidate_type(&self, data_type: &str) -> Result<bool> {
        let pattern = self.key_space().pattern_for(data_type)?;
        Ok(self.invalidate_pattern(&pattern).await)
    }

    // == Clear ==
    /// Drops every entry. Counters are kept.
    pub async fn clear(&self) -> bool {
        match self.backend().await.clear().await {
            Ok(()) => {
                info!("cache cleared");
                true
            }
            Err(e) => {
                warn!(error = %e, "cache clear failed");
                false
            }
        }
    }

    // == Stats ==
    /// Snapshot of the counters plus backend information.
    pub async fn stats(&self) -> CacheStats {
        let backend = self.backend().await;
        self.counters.snapshot(backend.kind(), backend.metrics().await)
    }

    pub fn reset_stats(&self) {
        self.counters.reset();
    }

    // == Shutdown ==
    /// Stops the background sweep, if one is running.
    pub fn shutdown(&self) {
        if let Ok(mut sweeper) = self.sweeper.lock() {
            if let Some(handle) = sweeper.take() {
                handle.abort();
                debug!("cache sweep task aborted");
            }
        }
    }
}

impl Drop for CacheEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for CacheEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEngine")
            .field("state", &self.state())
            .field("backend", &self.backend.get().map(|b| b.kind()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    use crate::backend::BackendMetrics;

    /// Backend whose every call fails.
    struct BrokenBackend;

    #[async_trait]
    impl CacheBackend for BrokenBackend {
        fn kind(&self) -> BackendKind {
            BackendKind::Networked
        }

        async fn get(&self, _key: &str) -> Result<Option<String>> {
            Err(CacheError::Timeout)
        }

        async fn set(&self, _key: &str, _value: String, _ttl: u64) -> Result<()> {
            Err(CacheError::BackendOperation("connection reset".to_string()))
        }

        async fn delete(&self, _key: &str) -> Result<()> {
            Err(CacheError::Timeout)
        }

        async fn clear(&self) -> Result<()> {
            Err(CacheError::Timeout)
        }

        async fn metrics(&self) -> BackendMetrics {
            BackendMetrics::default()
        }
    }

    /// Backend storing a raw string for every key.
    struct GarbageBackend;

    #[async_trait]
    impl CacheBackend for GarbageBackend {
        fn kind(&self) -> BackendKind {
            BackendKind::Local
        }

        async fn get(&self, _key: &str) -> Result<Option<String>> {
            Ok(Some("{not json".to_string()))
        }

        async fn set(&self, _key: &str, _value: String, _ttl: u64) -> Result<()> {
            Ok(())
        }

        async fn delete(&self, _key: &str) -> Result<()> {
            Ok(())
        }

        async fn clear(&self) -> Result<()> {
            Ok(())
        }

        async fn metrics(&self) -> BackendMetrics {
            BackendMetrics::default()
        }
    }

    fn local_engine() -> CacheEngine {
        CacheEngine::new(Config::local())
    }

    #[tokio::test]
    async fn test_starts_uninitialized() {
        let engine = local_engine();
        assert_eq!(engine.state(), EngineState::Uninitialized);

        engine.init().await;
        assert_eq!(engine.state(), EngineState::Ready);

        // second init is a no-op
        engine.init().await;
        assert_eq!(engine.state(), EngineState::Ready);
        assert_eq!(engine.backend_kind().await, BackendKind::Local);
    }

    #[tokio::test]
    async fn test_lazy_init_on_first_use() {
        let engine = local_engine();
        let value: Option<String> = engine.get("users", "1", &Params::new()).await.unwrap();

        assert!(value.is_none());
        assert_eq!(engine.state(), EngineState::Ready);
    }

    #[tokio::test]
    async fn test_backend_failures_degrade_silently() {
        let engine = CacheEngine::with_backend(PolicyTable::with_defaults(), Arc::new(BrokenBackend));

        let value: Option<u32> = engine.get("users", "1", &Params::new()).await.unwrap();
        assert!(value.is_none());
        assert!(!engine.set("users", "1", &1, &Params::new(), None).await.unwrap());
        assert!(!engine.delete("users", "1", &Params::new()).await.unwrap());
        assert!(!engine.clear().await);
        // Default fallback clears, which fails here
        assert!(!engine.invalidate_pattern("user:*").await);

        let stats = engine.stats().await;
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.sets, 0);
        assert_eq!(stats.deletes, 0);
    }

    #[tokio::test]
    async fn test_undecodable_entry_is_miss() {
        let engine = CacheEngine::with_backend(PolicyTable::with_defaults(), Arc::new(GarbageBackend));

        let value: Option<serde_json::Value> = engine.get("posts", "1", &Params::new()).await.unwrap();
        assert!(value.is_none());
        assert_eq!(engine.stats().await.misses, 1);
    }

    #[tokio::test]
    async fn test_unknown_type_is_surfaced() {
        let engine = local_engine();

        let get = engine.get::<u32>("widgets", "1", &Params::new()).await;
        assert!(matches!(get, Err(CacheError::UnknownDataType(_))));

        let set = engine.set("widgets", "1", &1, &Params::new(), None).await;
        assert!(matches!(set, Err(CacheError::UnknownDataType(_))));

        let delete = engine.delete("widgets", "1", &Params::new()).await;
        assert!(matches!(delete, Err(CacheError::UnknownDataType(_))));

        assert!(engine.invalidate_type("widgets").await.is_err());
    }

    #[tokio::test]
    async fn test_ttl_override_zero_uses_policy() {
        let engine = local_engine();
        assert!(engine
            .set("messages", "1", &json!({"text": "hi"}), &Params::new(), Some(0))
            .await
            .unwrap());

        let value: Option<serde_json::Value> = engine.get("messages", "1", &Params::new()).await.unwrap();
        assert_eq!(value, Some(json!({"text": "hi"})));
    }

    #[tokio::test]
    async fn test_clear_keeps_counters() {
        let engine = local_engine();
        engine.set("events", "1", &1, &Params::new(), None).await.unwrap();
        let _: Option<u32> = engine.get("events", "1", &Params::new()).await.unwrap();

        assert!(engine.clear().await);
        let value: Option<u32> = engine.get("events", "1", &Params::new()).await.unwrap();
        assert!(value.is_none());

        let stats = engine.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.sets, 1);
    }

    #[tokio::test]
    async fn test_invalidate_type() {
        let engine = local_engine();
        engine.set("users", "1", &1, &Params::new(), None).await.unwrap();
        engine.set("posts", "1", &2, &Params::new(), None).await.unwrap();

        assert!(engine.invalidate_type("users").await.unwrap());

        assert!(engine.get::<u32>("users", "1", &Params::new()).await.unwrap().is_none());
        assert_eq!(engine.get::<u32>("posts", "1", &Params::new()).await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn test_reset_stats() {
        let engine = local_engine();
        let _: Option<u32> = engine.get("users", "1", &Params::new()).await.unwrap();
        engine.reset_stats();

        let stats = engine.stats().await;
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.hit_rate, 0.0);
    }

    #[tokio::test]
    async fn test_shutdown_stops_sweeper() {
        let engine = local_engine();
        engine.init().await;

        let handle_present = engine.sweeper.lock().unwrap().is_some();
        assert!(handle_present);

        engine.shutdown();
        assert!(engine.sweeper.lock().unwrap().is_none());
    }
}
