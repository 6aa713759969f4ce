//! Background Tasks Module
//!
//! Contains background tasks that run periodically while the cache is live.
//!
//! # Tasks
//! - Expiry sweep: removes expired local entries at a fixed interval

mod sweep;

pub use sweep::spawn_sweep_task;
