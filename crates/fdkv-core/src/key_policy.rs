//! Canonicalization of a field valuation into a deterministic identifier string.
//!
//! Both policies serialize through the same canonical JSON encoding; `Hash`
//! additionally digests it. Determinism across processes is the whole point:
//! two `Core`s pointed at the same server must derive identical keys for
//! identical valuations.

use std::collections::BTreeMap;

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::config::KeyPolicyType;
use crate::error::{CoreError, Result};
use crate::schema::FieldDescriptor;

/// One (field, value) pair, where a missing value is represented as `None`.
pub type Valuation<'a> = [(&'a FieldDescriptor, Option<&'a str>)];

/// Derives a deterministic identifier string from a field valuation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPolicy {
    /// Canonical, minimally-separated JSON object keyed by field name.
    Json,
    /// SHA-256 hex digest of the `Json` encoding.
    Hash,
}

impl From<KeyPolicyType> for KeyPolicy {
    fn from(kind: KeyPolicyType) -> Self {
        match kind {
            KeyPolicyType::Json => KeyPolicy::Json,
            KeyPolicyType::Hash => KeyPolicy::Hash,
        }
    }
}

impl KeyPolicy {
    /// Canonicalize `valuation` into the configured identifier string.
    ///
    /// Fails with [`CoreError::Serialization`] if the valuation cannot be
    /// encoded as JSON — a real failure mode for caller-supplied field
    /// values, not an invariant the type system already guarantees.
    pub fn identify(self, valuation: &Valuation<'_>) -> Result<String> {
        let canonical = canonical_json(valuation)?;
        Ok(match self {
            KeyPolicy::Json => canonical,
            KeyPolicy::Hash => {
                let mut hasher = Sha256::new();
                hasher.update(canonical.as_bytes());
                hex::encode(hasher.finalize())
            }
        })
    }
}

/// Mapping keys are field *names* (sorted lexicographically via `BTreeMap`),
/// values are either the raw string or JSON null; separators are minimal.
fn canonical_json(valuation: &Valuation<'_>) -> Result<String> {
    let mut fields: BTreeMap<&str, Value> = BTreeMap::new();
    for (field, value) in valuation {
        let encoded = match value {
            Some(v) => Value::String((*v).to_string()),
            None => Value::Null,
        };
        fields.insert(field.name(), encoded);
    }

    serde_json::to_string(&fields).map_err(CoreError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fd(name: &str) -> FieldDescriptor {
        FieldDescriptor::new(name)
    }

    #[test]
    fn json_policy_sorts_keys_and_uses_minimal_separators() {
        let city = fd("city");
        let name = fd("name");
        let valuation: Vec<(&FieldDescriptor, Option<&str>)> =
            vec![(&name, Some("Jan")), (&city, Some("Wroclaw"))];

        let id = KeyPolicy::Json.identify(&valuation).unwrap();
        assert_eq!(id, r#"{"city":"Wroclaw","name":"Jan"}"#);
    }

    #[test]
    fn json_policy_encodes_missing_value_as_null() {
        let name = fd("name");
        let valuation: Vec<(&FieldDescriptor, Option<&str>)> = vec![(&name, None)];

        assert_eq!(KeyPolicy::Json.identify(&valuation).unwrap(), r#"{"name":null}"#);
    }

    #[test]
    fn hash_policy_is_sha256_of_json_policy() {
        let name = fd("name");
        let valuation: Vec<(&FieldDescriptor, Option<&str>)> = vec![(&name, Some("Jan"))];

        let json = KeyPolicy::Json.identify(&valuation).unwrap();
        let hash = KeyPolicy::Hash.identify(&valuation).unwrap();

        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));

        let mut hasher = Sha256::new();
        hasher.update(json.as_bytes());
        assert_eq!(hash, hex::encode(hasher.finalize()));
    }

    #[test]
    fn identify_is_deterministic_across_calls() {
        let a = fd("a");
        let b = fd("b");
        let v1: Vec<(&FieldDescriptor, Option<&str>)> = vec![(&a, Some("1")), (&b, Some("2"))];
        let v2: Vec<(&FieldDescriptor, Option<&str>)> = vec![(&b, Some("2")), (&a, Some("1"))];

        // Order of the input pairs must not matter.
        assert_eq!(KeyPolicy::Json.identify(&v1).unwrap(), KeyPolicy::Json.identify(&v2).unwrap());
    }
}
