//! Read-Through Helper
//!
//! Cache-first wrapper around an arbitrary async producer: compute once,
//! reuse until the entry expires.

use std::future::Future;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::cache::Params;
use crate::engine::CacheEngine;
use crate::error::CacheError;

impl CacheEngine {
    /// Returns the cached value for `(data_type, identifier, params)`, or
    /// runs `producer` and caches what it returns.
    ///
    /// - The producer runs at most once per call, and only on a miss.
    /// - A producer error is returned unchanged and nothing is cached.
    /// - `Ok(None)` from the producer is returned without caching.
    /// - An unknown data type is reported before the producer runs, through
    ///   `E: From<CacheError>`.
    ///
    /// Concurrent misses on the same key are not coalesced; each caller runs
    /// its own producer.
    pub async fn cached_query<T, E, F, Fut>(
        &self,
        data_type: &str,
        identifier: &str,
        producer: F,
        params: &Params,
        ttl_override: Option<u64>,
    ) -> Result<Option<T>, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<CacheError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
    {
        if let Some(hit) = self.get::<T>(data_type, identifier, params).await? {
            return Ok(Some(hit));
        }

        let produced = producer().await?;

        if let Some(value) = &produced {
            self.set(data_type, identifier, value, params, ttl_override)
                .await?;
        }

        Ok(produced)
    }
}
