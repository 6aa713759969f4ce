//! Key Space Module
//!
//! Builds deterministic cache keys from a data type, an identifier and an
//! optional parameter set.

use std::fmt::Write;

use serde_json::Value;

use crate::cache::policy::PolicyTable;
use crate::error::Result;

/// Request parameters that distinguish cached variants of one identifier.
pub type Params = serde_json::Map<String, Value>;

/// Separator between the identifier and the serialized parameters.
pub const PARAM_SEPARATOR: char = ':';

// == Key Space ==
/// Namespaces keys using the prefixes of a [`PolicyTable`].
#[derive(Debug, Clone, Copy)]
pub struct KeySpace<'a> {
    policies: &'a PolicyTable,
}

impl<'a> KeySpace<'a> {
    pub fn new(policies: &'a PolicyTable) -> Self {
        Self { policies }
    }

    /// Builds the key for `(data_type, identifier, params)`.
    ///
    /// Parameters are serialized with object keys sorted at every depth, so
    /// structurally equal maps always produce the same key. `:` and `%` in
    /// the identifier are percent-escaped, so the first separator after the
    /// prefix always starts the parameter section.
    pub fn build_key(&self, data_type: &str, identifier: &str, params: &Params) -> Result<String> {
        let policy = self.policies.get(data_type)?;

        let mut key = String::with_capacity(policy.key_prefix.len() + identifier.len());
        key.push_str(&policy.key_prefix);
        push_identifier(identifier, &mut key);

        if !params.is_empty() {
            key.push(PARAM_SEPARATOR);
            write_canonical_object(params, &mut key);
        }

        Ok(key)
    }

    /// Glob pattern matching every key of a data type.
    pub fn pattern_for(&self, data_type: &str) -> Result<String> {
        let policy = self.policies.get(data_type)?;
        Ok(format!("{}*", escape_glob(&policy.key_prefix)))
    }
}

/// Serializes a JSON value with object keys in lexicographic order.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => write_canonical_object(map, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        // Scalars already have a single JSON rendering
        scalar => {
            let _ = write!(out, "{}", scalar);
        }
    }
}

fn write_canonical_object(map: &Params, out: &mut String) {
    let mut entries: Vec<(&String, &Value)> = map.iter().collect();
    entries.sort_unstable_by(|a, b| a.0.cmp(b.0));

    out.push('{');
    for (i, (key, value)) in entries.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        let _ = write!(out, "{}", Value::String(key.clone()));
        out.push(':');
        write_canonical(value, out);
    }
    out.push('}');
}

fn push_identifier(identifier: &str, out: &mut String) {
    for c in identifier.chars() {
        match c {
            '%' => out.push_str("%25"),
            PARAM_SEPARATOR => out.push_str("%3A"),
            c => out.push(c),
        }
    }
}

fn escape_glob(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
