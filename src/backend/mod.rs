//! Backend Module
//!
//! Storage strategies holding the serialized cache entries.
//!
//! # Strategies
//! - [`LocalBackend`]: bounded in-process table with per-entry TTL
//! - [`RedisBackend`]: shared Redis store reached over the network

mod local;
mod remote;

pub use self::local::LocalBackend;
pub use self::remote::RedisBackend;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;

// == Backend Kind ==
/// Which strategy is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Local,
    Networked,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Local => "local",
            BackendKind::Networked => "networked",
        }
    }
}

// == Backend Metrics ==
/// Backend-specific figures reported alongside the engine counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackendMetrics {
    /// Entries currently stored
    pub entries: u64,
    /// Entries dropped to respect the capacity bound
    pub evictions: u64,
    /// Entries removed because their TTL elapsed
    pub expired: u64,
    /// Approximate memory footprint, when known
    pub approx_bytes: Option<u64>,
}

// == Backend Contract ==
/// Uniform storage contract shared by every strategy.
///
/// Values are opaque serialized strings; the engine owns encoding.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Whether [`CacheBackend::delete_matching`] removes only matching keys.
    fn supports_pattern_delete(&self) -> bool {
        false
    }

    /// Returns the stored value, or `None` when absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: String, ttl_seconds: u64) -> Result<()>;

    /// Removes a key. Removing an absent key succeeds.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Removes every key matching a glob pattern and returns how many were
    /// removed.
    ///
    /// Backends that cannot enumerate keys fall back to a full clear, which
    /// over-invalidates but never leaves a matching key behind.
    async fn delete_matching(&self, _pattern: &str) -> Result<u64> {
        self.clear().await?;
        Ok(0)
    }

    async fn clear(&self) -> Result<()>;

    async fn metrics(&self) -> BackendMetrics;
}
