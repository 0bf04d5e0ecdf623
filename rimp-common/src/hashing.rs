//! Request and identity hashing
//!
//! - [`body_hash`]: SHA-256 of the canonical JSON form of a request body.
//!   Two bodies that differ only in key order or whitespace hash the same,
//!   which is what the idempotency cache keys on.
//! - [`run_hash`]: salted SHA-256 of a canonical RUN, used in audit records
//!   instead of the raw identifier.

use crate::Identity;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Convert JSON to canonical form (sorted keys, no whitespace)
///
/// # Examples
///
/// ```
/// use rimp_common::hashing::to_canonical_json;
/// use serde_json::json;
///
/// let canonical = to_canonical_json(&json!({"rut": "1", "dv": "K"}));
/// assert_eq!(canonical, r#"{"dv":"K","rut":"1"}"#);
/// ```
pub fn to_canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut pairs: Vec<_> = map.iter().collect();
            pairs.sort_by_key(|(k, _)| *k);
            let items: Vec<String> = pairs
                .into_iter()
                .map(|(k, v)| {
                    format!(
                        "{}:{}",
                        Value::String(k.clone()),
                        to_canonical_json(v)
                    )
                })
                .collect();
            format!("{{{}}}", items.join(","))
        }
        Value::Array(arr) => {
            let items: Vec<String> = arr.iter().map(to_canonical_json).collect();
            format!("[{}]", items.join(","))
        }
        // Display on scalar values is compact and escapes strings correctly
        scalar => scalar.to_string(),
    }
}

/// SHA-256 (64 hex chars) of the canonical JSON of a request body
pub fn body_hash(body: &Value) -> String {
    sha256_hex(to_canonical_json(body).as_bytes())
}

/// Salted SHA-256 (64 hex chars) of a canonical RUN
pub fn run_hash(salt: &str, identity: &Identity) -> String {
    sha256_hex(format!("{}:{}", salt, identity.run()).as_bytes())
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
