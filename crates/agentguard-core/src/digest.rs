//! Canonical JSON and SHA-256 helpers shared by the audit chain, backups and
//! threat fingerprints.
//!
//! Canonical form (RFC 8785-class):
//! - object keys sorted by UTF-16 code units (§3.2.3)
//! - integer-valued floats collapse to integers
//! - compact output, array order preserved

use sha2::{Digest, Sha256};

/// Errors from canonicalization.
#[derive(Debug, thiserror::Error)]
pub enum DigestError {
    #[error("non-finite number in canonical JSON")]
    NonFinite,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// SHA-256 of raw bytes, lowercase hex.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn canonicalize(value: &serde_json::Value) -> Result<serde_json::Value, DigestError> {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_by(|a, b| a.encode_utf16().cmp(b.encode_utf16()));

            let mut sorted = serde_json::Map::new();
            for key in keys {
                if let Some(v) = map.get(key) {
                    sorted.insert(key.clone(), canonicalize(v)?);
                }
            }
            Ok(serde_json::Value::Object(sorted))
        }
        serde_json::Value::Array(items) => Ok(serde_json::Value::Array(
            items.iter().map(canonicalize).collect::<Result<Vec<_>, _>>()?,
        )),
        serde_json::Value::Number(n) if !(n.is_i64() || n.is_u64()) => {
            let Some(f) = n.as_f64() else {
                return Ok(value.clone());
            };
            if !f.is_finite() {
                return Err(DigestError::NonFinite);
            }
            if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
                Ok(serde_json::Value::Number(serde_json::Number::from(f as i64)))
            } else {
                Ok(value.clone())
            }
        }
        other => Ok(other.clone()),
    }
}

/// Canonical compact JSON text for `value`.
///
/// `serde_json::Map` keeps keys ordered by byte value, which agrees with
/// UTF-16 order for every BMP key; the explicit sort keeps the contract
/// independent of that detail.
pub fn canonical_json(value: &serde_json::Value) -> Result<String, DigestError> {
    Ok(serde_json::to_string(&canonicalize(value)?)?)
}

/// SHA-256 hex of the canonical JSON form of any serializable value.
pub fn canonical_digest<T: serde::Serialize>(value: &T) -> Result<String, DigestError> {
    let value = serde_json::to_value(value)?;
    Ok(sha256_hex(canonical_json(&value)?.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_hex_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn canonical_json_ignores_insertion_order() {
        let a = serde_json::json!({ "b": 1, "a": { "z": 1, "y": 2 } });
        let b = serde_json::json!({ "a": { "y": 2, "z": 1 }, "b": 1 });
        assert_eq!(
            canonical_json(&a).expect("canonical a"),
            canonical_json(&b).expect("canonical b")
        );
    }

    #[test]
    fn canonical_json_collapses_integer_floats() {
        let input = serde_json::json!({ "value": 2.0, "frac": 1.5 });
        assert_eq!(
            canonical_json(&input).expect("canonical"),
            r#"{"frac":1.5,"value":2}"#
        );
    }

    #[test]
    fn canonical_json_preserves_array_order() {
        let a = serde_json::json!([3, 1, 2]);
        let b = serde_json::json!([1, 2, 3]);
        assert_ne!(
            canonical_json(&a).expect("canonical a"),
            canonical_json(&b).expect("canonical b")
        );
    }

    #[test]
    fn canonical_digest_is_hex_sha256() {
        let digest = canonical_digest(&serde_json::json!({ "name": "SOUL.md" })).expect("digest");
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
