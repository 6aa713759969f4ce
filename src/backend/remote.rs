//! Redis Backend Module
//!
//! Shared store reached through a reconnecting connection manager. Every call
//! is bounded by a request timeout and a small retry budget.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{RedisError, RedisResult};
use tracing::{debug, info, warn};

use crate::backend::{BackendKind, BackendMetrics, CacheBackend};
use crate::config::RedisConfig;
use crate::error::{CacheError, Result};

/// Pause between two attempts of the same request.
const RETRY_DELAY: Duration = Duration::from_millis(100);

/// Keys requested per SCAN round trip.
const SCAN_BATCH: u64 = 100;

// == Redis Backend ==
/// Networked backend speaking the Redis protocol.
#[derive(Clone)]
pub struct RedisBackend {
    conn: ConnectionManager,
    max_retries: u32,
    request_timeout: Duration,
}

impl RedisBackend {
    /// Connects and verifies the server answers `PING`.
    ///
    /// Both steps share the configured connect timeout. Any failure is
    /// reported as [`CacheError::BackendConnect`].
    pub async fn connect(config: &RedisConfig) -> Result<Self> {
        let client = redis::Client::open(config.connection_info())
            .map_err(|e| CacheError::BackendConnect(e.to_string()))?;

        let mut conn = tokio::time::timeout(config.connect_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| {
                CacheError::BackendConnect(format!(
                    "no connection to {}:{} within {:?}",
                    config.host, config.port, config.connect_timeout
                ))
            })?
            .map_err(|e| CacheError::BackendConnect(e.to_string()))?;

        let pong: String = tokio::time::timeout(
            config.connect_timeout,
            redis::cmd("PING").query_async(&mut conn),
        )
        .await
        .map_err(|_| CacheError::BackendConnect("PING timed out".to_string()))?
        .map_err(|e| CacheError::BackendConnect(e.to_string()))?;

        info!(
            host = %config.host,
            port = config.port,
            db = config.db,
            reply = %pong,
            "Redis cache connected"
        );

        Ok(Self {
            conn,
            max_retries: config.max_retries,
            request_timeout: config.request_timeout,
        })
    }

    /// Runs one request with the timeout and retry budget applied.
    ///
    /// Only timeouts and transport failures are retried; an error reply from
    /// the server is returned at once.
    async fn run<T, F, Fut>(&self, op: &'static str, request: F) -> Result<T>
    where
        F: Fn(ConnectionManager) -> Fut,
        Fut: Future<Output = RedisResult<T>>,
    {
        let mut attempt = 0;
        loop {
            let failure = match tokio::time::timeout(self.request_timeout, request(self.conn.clone())).await
            {
                Ok(Ok(value)) => return Ok(value),
                // Server replies such as WRONGTYPE fail the same way every time
                Ok(Err(e)) if !is_transient(&e) => return Err(CacheError::from(e)),
                Ok(Err(e)) => CacheError::from(e),
                Err(_) => CacheError::Timeout,
            };

            if attempt >= self.max_retries {
                return Err(failure);
            }
            attempt += 1;
            debug!(op, attempt, error = %failure, "retrying Redis request");
            tokio::time::sleep(RETRY_DELAY).await;
        }
    }
}

#[async_trait]
impl CacheBackend for RedisBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Networked
    }

    fn supports_pattern_delete(&self) -> bool {
        true
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.run("get", move |mut conn| async move {
            let value: RedisResult<Option<String>> =
                redis::cmd("GET").arg(key).query_async(&mut conn).await;
            value
        })
        .await
    }

    async fn set(&self, key: &str, value: String, ttl_seconds: u64) -> Result<()> {
        let value = value.as_str();
        self.run("setex", move |mut conn| async move {
            let reply: RedisResult<()> = redis::cmd("SETEX")
                .arg(key)
                .arg(ttl_seconds)
                .arg(value)
                .query_async(&mut conn)
                .await;
            reply
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let _removed: u64 = self
            .run("del", move |mut conn| async move {
                let removed: RedisResult<u64> =
                    redis::cmd("DEL").arg(key).query_async(&mut conn).await;
                removed
            })
            .await?;
        Ok(())
    }

    /// Walks the keyspace with `SCAN MATCH`, deleting each batch, so the
    /// server is never blocked the way `KEYS` would block it.
    async fn delete_matching(&self, pattern: &str) -> Result<u64> {
        let mut cursor: u64 = 0;
        let mut removed = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = self
                .run("scan", move |mut conn| async move {
                    let page: RedisResult<(u64, Vec<String>)> = redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(pattern)
                        .arg("COUNT")
                        .arg(SCAN_BATCH)
                        .query_async(&mut conn)
                        .await;
                    page
                })
                .await?;

            if !keys.is_empty() {
                let batch = &keys;
                let deleted: u64 = self
                    .run("del", move |mut conn| async move {
                        let deleted: RedisResult<u64> =
                            redis::cmd("DEL").arg(batch).query_async(&mut conn).await;
                        deleted
                    })
                    .await?;
                removed += deleted;
            }

            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        Ok(removed)
    }

    async fn clear(&self) -> Result<()> {
        self.run("flushdb", |mut conn| async move {
            let reply: RedisResult<()> = redis::cmd("FLUSHDB").query_async(&mut conn).await;
            reply
        })
        .await
    }

    async fn metrics(&self) -> BackendMetrics {
        let entries: u64 = match self
            .run("dbsize", |mut conn| async move {
                let size: RedisResult<u64> = redis::cmd("DBSIZE").query_async(&mut conn).await;
                size
            })
            .await
        {
            Ok(size) => size,
            Err(e) => {
                warn!(error = %e, "failed to read Redis DBSIZE");
                0
            }
        };

        let approx_bytes = match self
            .run("info", |mut conn| async move {
                let info: RedisResult<String> =
                    redis::cmd("INFO").arg("memory").query_async(&mut conn).await;
                info
            })
            .await
        {
            Ok(info) => parse_used_memory(&info),
            Err(e) => {
                warn!(error = %e, "failed to read Redis INFO memory");
                None
            }
        };

        BackendMetrics {
            entries,
            evictions: 0,
            expired: 0,
            approx_bytes,
        }
    }
}

/// Whether a failed request may succeed if sent again.
fn is_transient(err: &RedisError) -> bool {
    err.is_io_error()
        || err.is_timeout()
        || err.is_connection_dropped()
        || err.is_connection_refusal()
}

/// Extracts `used_memory` from an `INFO memory` reply.
fn parse_used_memory(info: &str) -> Option<u64> {
    info.lines()
        .find_map(|line| line.strip_prefix("used_memory:"))
        .and_then(|value| value.trim().parse().ok())
}
