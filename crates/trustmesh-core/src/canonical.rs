//! # Canonical Serialization
//!
//! Evidence attached to an escrow transition is hashed from its RFC 8785
//! (JCS) form, produced by `serde_jcs`: keys sorted, no insignificant
//! whitespace. Two engines hashing the same note for the same transition
//! therefore agree byte for byte.
//!
//! Floats are refused. JCS renders them through the ECMAScript number
//! algorithm, which would make an amount's digest depend on its float
//! spelling; [`Amount`](crate::Amount) serializes as a decimal string
//! instead.

use serde::Serialize;
use serde_json::Value;

use crate::error::CanonicalizationError;

/// JCS-canonical UTF-8 JSON, guaranteed float-free.
///
/// Only [`CanonicalBytes::new`] and [`CanonicalBytes::from_value`] build
/// one, so holding a `CanonicalBytes` proves the bytes went through
/// canonicalization.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CanonicalBytes(String);

impl CanonicalBytes {
    /// Canonicalize any serializable value.
    ///
    /// # Errors
    ///
    /// [`CanonicalizationError::FloatRejected`] if any number in the value
    /// is fractional, [`CanonicalizationError::SerializationFailed`] if the
    /// value does not serialize to JSON.
    pub fn new(obj: &impl Serialize) -> Result<Self, CanonicalizationError> {
        Self::from_value(serde_json::to_value(obj)?)
    }

    /// Canonicalize an already-built JSON value.
    pub fn from_value(value: Value) -> Result<Self, CanonicalizationError> {
        if let Some(f) = first_float(&value) {
            return Err(CanonicalizationError::FloatRejected(f));
        }
        Ok(Self(serde_jcs::to_string(&value)?))
    }

    /// The canonical bytes.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// The canonical JSON text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no bytes (never true for a canonicalized value).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl AsRef<[u8]> for CanonicalBytes {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

/// Depth-first search for a fractional number.
fn first_float(root: &Value) -> Option<f64> {
    let mut pending = vec![root];
    while let Some(value) = pending.pop() {
        match value {
            Value::Number(n) if !n.is_i64() && !n.is_u64() => return n.as_f64(),
            Value::Array(items) => pending.extend(items),
            Value::Object(map) => pending.extend(map.values()),
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn evidence_shape_is_sorted_and_compact() {
        let cb = CanonicalBytes::new(&json!({
            "text": "Delivered at port",
            "operation": "release",
            "escrow_id": 7
        }))
        .unwrap();
        assert_eq!(
            cb.as_str(),
            r#"{"escrow_id":7,"operation":"release","text":"Delivered at port"}"#
        );
        assert_eq!(cb.len(), cb.as_bytes().len());
        assert!(!cb.is_empty());
    }

    #[test]
    fn nested_keys_sorted_arrays_kept_in_order() {
        let value = json!({"z": [3, 1, 2], "a": {"y": null, "b": true}});
        let cb = CanonicalBytes::new(&value).unwrap();
        assert_eq!(cb.as_str(), r#"{"a":{"b":true,"y":null},"z":[3,1,2]}"#);
    }

    #[test]
    fn fractional_numbers_rejected_at_any_depth() {
        for value in [
            json!(0.5),
            json!({"amount": 12.75}),
            json!({"legs": [{"amount": 1}, {"amount": 2.5}]}),
        ] {
            assert!(matches!(
                CanonicalBytes::from_value(value),
                Err(CanonicalizationError::FloatRejected(_))
            ));
        }
    }

    #[test]
    fn large_integers_and_amount_strings_accepted() {
        let cb = CanonicalBytes::new(&json!({
            "count": u64::MAX,
            "amount": crate::Amount::new(u128::MAX),
        }))
        .unwrap();
        assert!(cb.as_str().contains(&u64::MAX.to_string()));
        assert!(cb.as_str().contains(&format!("\"{}\"", u128::MAX)));
    }

    #[test]
    fn unicode_text_is_preserved() {
        let cb = CanonicalBytes::new(&json!({"text": "Zollfreigabe ✓"})).unwrap();
        assert_eq!(cb.as_str(), "{\"text\":\"Zollfreigabe ✓\"}");
    }
}
