//! Two-tier cache: external-API responses (`api_cache`) and LLM
//! prompt/response pairs (`llm_cache`), sharing a deterministic
//! sorted-JSON hashing scheme for cache keys.

pub mod api_cache;
pub mod llm_cache;
#[cfg(feature = "sqlite")]
pub mod sql_backend;

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Recursively sort object keys so two semantically-identical JSON
/// values with differently-ordered keys hash to the same string. Arrays
/// keep their element order (order is meaningful there).
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted: Vec<(&String, &Value)> = map.iter().collect();
            sorted.sort_by(|a, b| a.0.cmp(b.0));
            let mut out = serde_json::Map::new();
            for (k, v) in sorted {
                out.insert(k.clone(), canonicalize(v));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// SHA-256 hex digest of the canonical (sorted-key) JSON serialisation
/// of `value`. Used as `cache_key` for both cache tiers.
pub fn cache_key(value: &Value) -> String {
    let canonical = canonicalize(value);
    let bytes = serde_json::to_vec(&canonical).expect("json values always serialise");
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_is_order_independent_over_object_keys() {
        let a = json!({"b": 1, "a": 2});
        let b = json!({"a": 2, "b": 1});
        assert_eq!(cache_key(&a), cache_key(&b));
    }

    #[test]
    fn key_is_order_dependent_over_array_elements() {
        let a = json!([1, 2, 3]);
        let b = json!([3, 2, 1]);
        assert_ne!(cache_key(&a), cache_key(&b));
    }
}
