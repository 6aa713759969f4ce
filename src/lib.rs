//! Policy Cache - application caching layer
//!
//! Per data type TTL policies and key namespacing in front of a local or
//! Redis backend, with read-through and response caching helpers.

pub mod api;
pub mod backend;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod middleware;
pub mod models;
mod read_through;
pub mod tasks;

pub use api::AppState;
pub use backend::{BackendKind, BackendMetrics, CacheBackend, LocalBackend, RedisBackend};
pub use cache::{CacheStats, Params, PolicyTable};
pub use config::{CacheMode, Config};
pub use engine::{CacheEngine, EngineState};
pub use error::{CacheError, Result};
pub use middleware::{response_cache_layer, ResponseCache};
