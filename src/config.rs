//! Configuration Module
//!
//! Handles loading cache configuration from environment variables.

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use redis::{ConnectionAddr, ConnectionInfo, RedisConnectionInfo};

use crate::cache::policy::DEFAULT_POLICIES;

/// Backend selection mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    /// Always use the in-process store
    Local,
    /// Try the networked store, fall back to local on failure
    Networked,
}

impl CacheMode {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "local" | "memory" | "development" => Some(CacheMode::Local),
            "networked" | "redis" | "production" => Some(CacheMode::Networked),
            _ => None,
        }
    }
}

/// Connection settings for the networked backend.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    /// Logical database index
    pub db: i64,
    /// Retries per request before the call is treated as failed
    pub max_retries: u32,
    /// Per-request timeout
    pub request_timeout: Duration,
    /// Timeout for the initial connection and PING
    pub connect_timeout: Duration,
}

impl RedisConfig {
    /// Builds the connection settings for the Redis client.
    ///
    /// Credentials are passed as structured fields rather than through a
    /// `redis://` URL, so passwords need no escaping.
    pub fn connection_info(&self) -> ConnectionInfo {
        ConnectionInfo {
            addr: ConnectionAddr::Tcp(self.host.clone(), self.port),
            redis: RedisConnectionInfo {
                db: self.db,
                password: self.password.clone().filter(|p| !p.is_empty()),
                ..RedisConnectionInfo::default()
            },
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            password: None,
            db: 0,
            max_retries: 3,
            request_timeout: Duration::from_millis(2000),
            connect_timeout: Duration::from_millis(2000),
        }
    }
}

/// Cache configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Backend selection mode
    pub mode: CacheMode,
    /// Networked backend settings
    pub redis: RedisConfig,
    /// Maximum number of entries the local store can hold
    pub local_max_entries: usize,
    /// Interval in seconds between local expiry sweeps
    pub sweep_interval: u64,
    /// HTTP port for the stats/health server
    pub server_port: u16,
    /// Per data type TTL overrides in seconds
    pub ttl_overrides: HashMap<String, u64>,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_MODE` - `local` or `networked` (default: networked)
    /// - `REDIS_HOST`, `REDIS_PORT`, `REDIS_PASSWORD`, `REDIS_DB`
    /// - `REDIS_MAX_RETRIES` - retries per request (default: 3)
    /// - `REDIS_TIMEOUT_MS` - per-request timeout (default: 2000)
    /// - `REDIS_CONNECT_TIMEOUT_MS` - connect timeout (default: 2000)
    /// - `LOCAL_MAX_ENTRIES` - local store bound (default: 10000)
    /// - `SWEEP_INTERVAL` - expiry sweep frequency in seconds (default: 60)
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    /// - `CACHE_TTL_<TYPE>` - TTL override for a data type, e.g. `CACHE_TTL_USERS`
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let mode = env::var("CACHE_MODE")
            .ok()
            .and_then(|v| CacheMode::parse(&v))
            .unwrap_or(defaults.mode);

        let redis = RedisConfig {
            host: env::var("REDIS_HOST").unwrap_or(defaults.redis.host),
            port: parse_env("REDIS_PORT").unwrap_or(defaults.redis.port),
            password: env::var("REDIS_PASSWORD").ok(),
            db: parse_env("REDIS_DB").unwrap_or(defaults.redis.db),
            max_retries: parse_env("REDIS_MAX_RETRIES").unwrap_or(defaults.redis.max_retries),
            request_timeout: parse_env("REDIS_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.redis.request_timeout),
            connect_timeout: parse_env("REDIS_CONNECT_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.redis.connect_timeout),
        };

        let ttl_overrides = DEFAULT_POLICIES
            .iter()
            .filter_map(|(data_type, _, _)| {
                let var = format!("CACHE_TTL_{}", data_type.to_ascii_uppercase());
                parse_env::<u64>(&var)
                    .filter(|ttl| *ttl > 0)
                    .map(|ttl| (data_type.to_string(), ttl))
            })
            .collect();

        Self {
            mode,
            redis,
            local_max_entries: parse_env("LOCAL_MAX_ENTRIES").unwrap_or(defaults.local_max_entries),
            sweep_interval: parse_env("SWEEP_INTERVAL").unwrap_or(defaults.sweep_interval),
            server_port: parse_env("SERVER_PORT").unwrap_or(defaults.server_port),
            ttl_overrides,
        }
    }

    /// Local-only configuration, handy for tests and development.
    pub fn local() -> Self {
        Self {
            mode: CacheMode::Local,
            ..Self::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: CacheMode::Networked,
            redis: RedisConfig::default(),
            local_max_entries: 10_000,
            sweep_interval: 60,
            server_port: 3000,
            ttl_overrides: HashMap::new(),
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.mode, CacheMode::Networked);
        assert_eq!(config.redis.host, "localhost");
        assert_eq!(config.redis.port, 6379);
        assert_eq!(config.redis.db, 0);
        assert_eq!(config.redis.max_retries, 3);
        assert_eq!(config.local_max_entries, 10_000);
        assert_eq!(config.sweep_interval, 60);
        assert_eq!(config.server_port, 3000);
        assert!(config.ttl_overrides.is_empty());
    }

    #[test]
    fn test_cache_mode_parse() {
        assert_eq!(CacheMode::parse("local"), Some(CacheMode::Local));
        assert_eq!(CacheMode::parse(" Redis "), Some(CacheMode::Networked));
        assert_eq!(CacheMode::parse("development"), Some(CacheMode::Local));
        assert_eq!(CacheMode::parse("bogus"), None);
    }

    fn tcp_target(info: &ConnectionInfo) -> Option<(&str, u16)> {
        match &info.addr {
            ConnectionAddr::Tcp(host, port) => Some((host.as_str(), *port)),
            _ => None,
        }
    }

    #[test]
    fn test_connection_info_without_password() {
        let info = RedisConfig::default().connection_info();
        assert_eq!(tcp_target(&info), Some(("localhost", 6379)));
        assert_eq!(info.redis.db, 0);
        assert!(info.redis.password.is_none());
    }

    #[test]
    fn test_connection_info_keeps_password_verbatim() {
        let redis = RedisConfig {
            password: Some("p/a#s?s%40@x".to_string()),
            db: 2,
            ..RedisConfig::default()
        };

        let info = redis.connection_info();
        assert_eq!(info.redis.password.as_deref(), Some("p/a#s?s%40@x"));
        assert_eq!(info.redis.db, 2);
        assert_eq!(tcp_target(&info), Some(("localhost", 6379)));
    }

    #[test]
    fn test_connection_info_empty_password_is_none() {
        let redis = RedisConfig {
            password: Some(String::new()),
            ..RedisConfig::default()
        };
        assert!(redis.connection_info().redis.password.is_none());
    }

    #[test]
    fn test_config_local() {
        let config = Config::local();
        assert_eq!(config.mode, CacheMode::Local);
    }
}
