//! Policy Table Module
//!
//! Maps each data type tag to its expiration time and key prefix.

use std::collections::HashMap;

use serde::Serialize;

use crate::error::{CacheError, Result};

/// Seed policies as `(data_type, ttl_seconds, key_prefix)`.
pub const DEFAULT_POLICIES: &[(&str, u64, &str)] = &[
    ("users", 600, "user:"),
    ("posts", 300, "pub:"),
    ("conversations", 180, "conv:"),
    ("messages", 120, "msg:"),
    ("events", 900, "event:"),
    ("analytics", 3600, "analytics:"),
    ("reports", 7200, "report:"),
];

// == Policy Entry ==
/// Expiration and namespacing policy for one data type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyEntry {
    pub data_type: String,
    pub ttl_seconds: u64,
    pub key_prefix: String,
}

// == Policy Table ==
/// Closed, read-only set of policies fixed at startup.
#[derive(Debug, Clone)]
pub struct PolicyTable {
    entries: HashMap<String, PolicyEntry>,
}

impl PolicyTable {
    /// Builds the table from the seed policies.
    pub fn with_defaults() -> Self {
        Self::with_ttl_overrides(&HashMap::new())
    }

    /// Builds the table from the seed policies, replacing the TTL of any
    /// data type present in `overrides`. Zero overrides are ignored.
    pub fn with_ttl_overrides(overrides: &HashMap<String, u64>) -> Self {
        let entries = DEFAULT_POLICIES
            .iter()
            .map(|(data_type, ttl, prefix)| {
                let ttl_seconds = overrides
                    .get(*data_type)
                    .copied()
                    .filter(|ttl| *ttl > 0)
                    .unwrap_or(*ttl);
                (
                    data_type.to_string(),
                    PolicyEntry {
                        data_type: data_type.to_string(),
                        ttl_seconds,
                        key_prefix: prefix.to_string(),
                    },
                )
            })
            .collect();

        Self { entries }
    }

    /// Looks up the policy for a data type.
    ///
    /// Unknown tags are an error, never a default.
    pub fn get(&self, data_type: &str) -> Result<&PolicyEntry> {
        self.entries
            .get(data_type)
            .ok_or_else(|| CacheError::UnknownDataType(data_type.to_string()))
    }

    /// Returns the registered data type tags, sorted.
    pub fn data_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self::with_defaults()
    }
}
