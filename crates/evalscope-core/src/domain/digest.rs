//! Canonical JSON and content digests for suite definitions.
//!
//! Two definitions that differ only in key order or in `1` vs `1.0` produce
//! the same digest. Object keys are ordered by UTF-16 code units and
//! integer-valued floats collapse to integers; NaN/Infinity are rejected.

use serde_json::{Map, Number, Value};
use sha2::{Digest, Sha256};

use crate::domain::error::{ConfigError, EvalResult};

fn canonicalize(value: &Value) -> EvalResult<Value> {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_by(|a, b| a.encode_utf16().cmp(b.encode_utf16()));
            let mut sorted = Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key.as_str()])?);
            }
            Ok(Value::Object(sorted))
        }
        Value::Array(items) => Ok(Value::Array(
            items.iter().map(canonicalize).collect::<EvalResult<_>>()?,
        )),
        Value::Number(n) if !(n.is_i64() || n.is_u64()) => {
            let f = n.as_f64().ok_or(ConfigError::NonFiniteNumber)?;
            if !f.is_finite() {
                return Err(ConfigError::NonFiniteNumber.into());
            }
            if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
                Ok(Value::Number(Number::from(f as i64)))
            } else {
                Ok(value.clone())
            }
        }
        other => Ok(other.clone()),
    }
}

/// Compact canonical serialization of `value`.
pub fn canonical_json(value: &Value) -> EvalResult<String> {
    Ok(serde_json::to_string(&canonicalize(value)?)?)
}

/// SHA-256 hex digest of the canonical form of `value`.
pub fn compute_digest(value: &Value) -> EvalResult<String> {
    let canonical = canonical_json(value)?;
    Ok(hex::encode(Sha256::digest(canonical.as_bytes())))
}

/// First 12 hex chars, used as a human-facing version string.
pub fn short_digest(digest: &str) -> &str {
    &digest[..12.min(digest.len())]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_order_does_not_change_digest() {
        let a = serde_json::json!({"name": "qa", "trials": 3, "scorers": ["exact"]});
        let b = serde_json::json!({"scorers": ["exact"], "trials": 3, "name": "qa"});
        assert_eq!(compute_digest(&a).unwrap(), compute_digest(&b).unwrap());
    }

    #[test]
    fn test_integer_valued_float_collapses() {
        let canonical = canonical_json(&serde_json::json!({"threshold": 1.0})).unwrap();
        assert_eq!(canonical, r#"{"threshold":1}"#);
    }

    #[test]
    fn test_fractional_float_kept() {
        let canonical = canonical_json(&serde_json::json!({"threshold": 0.8})).unwrap();
        assert_eq!(canonical, r#"{"threshold":0.8}"#);
    }

    #[test]
    fn test_nested_keys_sorted() {
        let canonical = canonical_json(&serde_json::json!({"b": {"d": 1, "c": 2}, "a": [{"z": 0, "y": 1}]}))
            .unwrap();
        assert_eq!(canonical, r#"{"a":[{"y":1,"z":0}],"b":{"c":2,"d":1}}"#);
    }

    #[test]
    fn test_digest_is_hex_sha256() {
        let digest = compute_digest(&serde_json::json!({"a": 1})).unwrap();
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(short_digest(&digest).len(), 12);
    }
}
