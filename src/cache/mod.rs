//! Cache Module
//!
//! Policy table, key space and accounting shared by every backend.

pub mod entry;
pub mod keys;
pub mod pattern;
pub mod policy;
mod stats;


// Re-export public types
pub use entry::CacheEntry;
pub use keys::{canonical_json, KeySpace, Params};
pub use pattern::glob_match;
pub use policy::{PolicyEntry, PolicyTable, DEFAULT_POLICIES};
pub use stats::{hit_rate, CacheCounters, CacheStats};

// == Public Constants ==
/// Maximum allowed key length in bytes
pub const MAX_KEY_LENGTH: usize = 1024;

/// Maximum allowed serialized value size in bytes
pub const MAX_VALUE_SIZE: usize = 1024 * 1024; // 1 MB
