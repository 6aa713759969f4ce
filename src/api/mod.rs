//! API Module
//!
//! HTTP handlers and routing for the cache's operational endpoints.
//!
//! # Endpoints
//! - `GET /stats` - Cache statistics snapshot
//! - `GET /health` - Health check endpoint

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
