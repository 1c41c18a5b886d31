//! The keyword set store's value type (§4.B).

use crate::ids::KeywordSetId;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A named bag of program-specific keyword overrides, deduplicated by a hash of its contents
/// (`hash_index` in the original implementation).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordSet {
    /// Assigned on insert.
    pub id: Option<KeywordSetId>,
    /// Arbitrary program-specific key/value overrides. Stored canonically (keys sorted) so that
    /// two submissions with the same content in a different key order dedup onto one row.
    pub values: serde_json::Value,
    /// Optional human-readable comment, not part of the dedup key.
    pub comments: Option<String>,
}

impl KeywordSet {
    /// Content hash used as the dedup key.
    pub fn hash_index(&self) -> String {
        let canonical = canonical_json(&self.values);
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        let digest = hasher.finalize();
        let mut out = String::with_capacity(digest.len() * 2);
        for byte in digest {
            use std::fmt::Write;
            let _ = write!(out, "{byte:02x}");
        }
        out
    }
}

/// Serialize a JSON value with object keys sorted, so semantically identical keyword sets hash
/// identically regardless of field order.
fn canonical_json(value: &serde_json::Value) -> String {
    fn sort(value: &serde_json::Value) -> serde_json::Value {
        match value {
            serde_json::Value::Object(map) => {
                let mut entries: Vec<_> = map.iter().collect();
                entries.sort_by(|a, b| a.0.cmp(b.0));
                let mut sorted = serde_json::Map::new();
                for (k, v) in entries {
                    sorted.insert(k.clone(), sort(v));
                }
                serde_json::Value::Object(sorted)
            }
            serde_json::Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(sort).collect())
            }
            other => other.clone(),
        }
    }
    sort(value).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn hash_ignores_key_order() {
        let a = KeywordSet {
            id: None,
            values: json!({"a": 1, "b": 2}),
            comments: None,
        };
        let b = KeywordSet {
            id: None,
            values: json!({"b": 2, "a": 1}),
            comments: Some("different comment".into()),
        };
        assert_eq!(a.hash_index(), b.hash_index());
    }

    #[test]
    fn hash_differs_on_value() {
        let a = KeywordSet {
            id: None,
            values: json!({"a": 1}),
            comments: None,
        };
        let b = KeywordSet {
            id: None,
            values: json!({"a": 2}),
            comments: None,
        };
        assert_ne!(a.hash_index(), b.hash_index());
    }
}
