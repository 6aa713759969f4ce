//! API Handlers
//!
//! HTTP handlers exposing the cache's stats export and health.

use std::sync::Arc;

use axum::{extract::State, Json};

use crate::cache::CacheStats;
use crate::config::Config;
use crate::engine::CacheEngine;
use crate::models::HealthResponse;

/// Application state shared across all handlers.
///
/// Holds the process-wide engine; the same `Arc` is handed to every other
/// consumer of the cache.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<CacheEngine>,
}

impl AppState {
    /// Creates a new AppState around an existing engine.
    pub fn new(engine: Arc<CacheEngine>) -> Self {
        Self { engine }
    }

    /// Creates a new AppState from configuration.
    ///
    /// The engine is not initialized yet; call `engine.init()` at startup.
    pub fn from_config(config: &Config) -> Self {
        Self::new(Arc::new(CacheEngine::new(config.clone())))
    }
}

/// Handler for GET /stats
///
/// Returns the counters snapshot with backend information.
pub async fn stats_handler(State(state): State<AppState>) -> Json<CacheStats> {
    Json(state.engine.stats().await)
}

/// Handler for GET /health
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse::healthy(state.engine.backend_kind().await))
}
