//! Canonical JSON and content-addressed hashing.
//!
//! Every hash in an evidence package is computed over the output of
//! [`canonicalize`]: compact JSON with recursively sorted object keys and
//! scalar rendering delegated to `serde_json`, so two processes hashing the
//! same value agree byte for byte. This module is the sole hashing substrate;
//! nothing else in the workspace feeds raw structs to a digest.

use std::fmt::Write as _;

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Containers nested deeper than this are replaced by the `"[Circular]"`
/// sentinel. `serde_json::Value` cannot hold reference cycles, so runaway
/// depth is the only re-entrant shape a JSON-like value can take here.
const MAX_DEPTH: usize = 128;

const CIRCULAR_SENTINEL: &str = "[Circular]";

/// Render a JSON value in canonical form.
///
/// Object keys are sorted lexicographically by Unicode code point (UTF-8 byte
/// order is identical), arrays keep their order, and scalars are rendered by
/// `serde_json` so numbers use the standard minimal decimal form. The output
/// is byte-identical for semantically equal inputs.
#[must_use]
pub fn canonicalize(value: &Value) -> String {
    let mut out = String::new();
    write_value(&mut out, value, 0);
    out
}

/// Serialize any value and render it canonically.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let value = serde_json::to_value(value)?;
    Ok(canonicalize(&value))
}

/// Lowercase hex SHA-256 of a string.
#[must_use]
pub fn sha256_hex(data: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data.as_bytes());
    hex::encode(hasher.finalize())
}

/// SHA-256 over the canonical JSON rendering of a value.
pub fn sha256_canonical_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    Ok(sha256_hex(&canonical_json(value)?))
}

fn write_value(out: &mut String, value: &Value, depth: usize) {
    if depth > MAX_DEPTH && (value.is_array() || value.is_object()) {
        push_json_string(out, CIRCULAR_SENTINEL);
        return;
    }
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => {
            let _ = write!(out, "{n}");
        }
        Value::String(s) => push_json_string(out, s),
        Value::Array(items) => {
            out.push('[');
            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                write_value(out, item, depth + 1);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            out.push('{');
            for (idx, key) in keys.iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                push_json_string(out, key);
                out.push(':');
                if let Some(item) = map.get(*key) {
                    write_value(out, item, depth + 1);
                }
            }
            out.push('}');
        }
    }
}

fn push_json_string(out: &mut String, s: &str) {
    if let Ok(quoted) = serde_json::to_string(s) {
        out.push_str(&quoted);
    } else {
        out.push_str("\"\"");
    }
}
