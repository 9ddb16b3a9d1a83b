//! Compound key codec (`spec.md` §4.2).
//!
//! An entity's store key is a partition component (`_id`) and an optional
//! sort component (`_sk`). Both are built from one or more typed key
//! fields by joining their stringified forms with the separator byte
//! U+0000, which cannot appear in a DynamoDB string attribute and so is
//! never ambiguous with field content. Non-string components are
//! JSON-serialized first so that numbers, bools, and other scalar field
//! types still produce a stable, comparable string.

use crate::error::{Error, ErrorOrigin, Result};
use crate::value::Value;

/// The byte joining multiple key-field components within one key part.
/// Chosen because DynamoDB string attributes are valid UTF-8 and never
/// contain U+0000, so encoding can never collide with field content
/// (`spec.md` §4.2).
pub const SEPARATOR: char = '\u{0}';

/// Renders one key-field value as the string that participates in a
/// compound key. Strings embed verbatim (after checking they don't carry
/// the separator); every other scalar type is JSON-serialized so the
/// textual form round-trips through `decode_component`.
fn encode_component(field: &'static str, value: &Value) -> Result<String> {
    let rendered = match value {
        Value::S(s) => s.clone(),
        Value::N(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => serde_json::to_string(&DebugValue(other)).map_err(|_| Error::Validation {
            field: field.to_owned(),
            message: format!("key component of type `{}` is not encodable", other.type_name()),
        })?,
    };
    if rendered.contains(SEPARATOR) {
        return Err(Error::KeySeparatorInValue { field });
    }
    Ok(rendered)
}

/// A minimal serde_json bridge for the non-scalar `Value` variants that
/// key fields are permitted to use (sets/lists/maps are not, in practice,
/// valid key field types, but this keeps `encode_component` total).
struct DebugValue<'a>(&'a Value);

impl serde::Serialize for DebugValue<'_> {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeSeq;
        match self.0 {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::S(s) => serializer.serialize_str(s),
            Value::N(n) => serializer.serialize_str(&n.to_string()),
            Value::B(b) => serializer.serialize_bytes(b),
            Value::Ss(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Ns(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(&item.to_string())?;
                }
                seq.end()
            }
            Value::Bs(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(&serde_bytes_slice(item))?;
                }
                seq.end()
            }
            Value::L(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(&DebugValue(item))?;
                }
                seq.end()
            }
            Value::M(map) => serializer.collect_map(map.iter().map(|(k, v)| (k, DebugValue(v)))),
        }
    }
}

fn serde_bytes_slice(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    bytes.iter().fold(String::new(), |mut acc, b| {
        let _ = write!(acc, "{b:02x}");
        acc
    })
}

/// Joins one or more key-field values into a single compound key part
/// (the partition part or the sort part).
///
/// # Errors
/// [`Error::KeySeparatorInValue`] if any component's rendered text
/// contains [`SEPARATOR`]; [`Error::Validation`] if a component's `Value`
/// variant cannot be rendered as key text.
pub fn encode(components: &[(&'static str, &Value)]) -> Result<String> {
    let mut parts = Vec::with_capacity(components.len());
    for (field, value) in components {
        parts.push(encode_component(field, value)?);
    }
    Ok(parts.join(&SEPARATOR.to_string()))
}

/// Splits a compound key part back into its raw component strings.
///
/// This is the inverse of the join half of [`encode`]; it does not know
/// each component's original `Value` type; callers re-parse components
/// against the entity's declared key-field types.
///
/// # Errors
/// [`Error::BadKeyEncoding`] if the number of components found does not
/// match `expected`.
pub fn decode_parts(encoded: &str, expected: usize) -> Result<Vec<String>> {
    let parts: Vec<String> = encoded.split(SEPARATOR).map(str::to_owned).collect();
    if parts.len() != expected {
        return Err(Error::BadKeyEncoding {
            expected,
            found: parts.len(),
        });
    }
    Ok(parts)
}

/// Origin tag for validation errors raised while building keys, matching
/// the teacher's per-module `ErrorOrigin` pattern.
#[must_use]
pub const fn origin() -> ErrorOrigin {
    ErrorOrigin::Key
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn round_trips_single_string_component() {
        let value = Value::S("user#42".to_owned());
        let encoded = encode(&[("id", &value)]).unwrap();
        assert_eq!(encoded, "user#42");
        let parts = decode_parts(&encoded, 1).unwrap();
        assert_eq!(parts, vec!["user#42".to_owned()]);
    }

    #[test]
    fn joins_multiple_components_with_separator() {
        let a = Value::S("tenant-1".to_owned());
        let b = Value::N(Decimal::from(42));
        let encoded = encode(&[("tenant", &a), ("seq", &b)]).unwrap();
        assert_eq!(encoded, format!("tenant-1{SEPARATOR}42"));
        let parts = decode_parts(&encoded, 2).unwrap();
        assert_eq!(parts, vec!["tenant-1".to_owned(), "42".to_owned()]);
    }

    #[test]
    fn rejects_separator_byte_in_string_component() {
        let value = Value::S(format!("bad{SEPARATOR}value"));
        let err = encode(&[("id", &value)]).unwrap_err();
        assert!(matches!(err, Error::KeySeparatorInValue { field: "id" }));
    }

    #[test]
    fn rejects_mismatched_component_count() {
        let encoded = format!("a{SEPARATOR}b");
        let err = decode_parts(&encoded, 1).unwrap_err();
        assert!(matches!(
            err,
            Error::BadKeyEncoding {
                expected: 1,
                found: 2
            }
        ));
    }

    #[test]
    fn same_logical_key_encodes_byte_identical() {
        let a1 = Value::S("x".to_owned());
        let a2 = Value::N(Decimal::from(7));
        let first = encode(&[("a", &a1), ("b", &a2)]).unwrap();
        let second = encode(&[("a", &a1), ("b", &a2)]).unwrap();
        assert_eq!(first, second);
    }
}
