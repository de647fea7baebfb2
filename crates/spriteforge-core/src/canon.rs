//! Canonical JSON and manifest hashing.
//!
//! A run is identified by the SHA-256 of its manifest rendered in canonical
//! form: object keys sorted recursively, compact separators, no trailing
//! whitespace. Hashing the canonical form makes the identity stable under any
//! key reordering of the input file, which is what resume detection relies on.

use serde_json::Value;
use sha2::Digest;

/// Render a JSON value in canonical form.
///
/// Objects are written with keys in lexicographic order at every level;
/// arrays keep their order. Numbers and strings use `serde_json`'s standard
/// rendering so the output is itself valid JSON.
#[must_use]
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // Keys are serialized through serde_json for correct escaping.
                out.push_str(&serde_json::to_string(key).expect("string serializes"));
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
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
        other => {
            out.push_str(&serde_json::to_string(other).expect("scalar serializes"));
        }
    }
}

/// Lowercase hex SHA-256 of a byte slice.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = sha2::Sha256::digest(bytes);
    let mut out = String::with_capacity(64);
    use std::fmt::Write;
    for b in digest {
        write!(&mut out, "{b:02x}").expect("writing to String should not fail");
    }
    out
}

/// Hash a JSON value in canonical form.
#[must_use]
pub fn hash_value(value: &Value) -> String {
    sha256_hex(canonical_json(value).as_bytes())
}
