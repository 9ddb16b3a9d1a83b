//! Wire-level value representation shared by fields, keys, and the store
//! contract.
//!
//! `Value` mirrors a document store's native attribute-value union closely
//! enough to round-trip through DynamoDB's `AttributeValue`, but carries no
//! dependency on `aws-sdk-dynamodb` itself — only `crate::store::dynamo`
//! converts between the two. This keeps the engine testable against
//! `crate::store::memory::MemoryStore` without pulling in the AWS SDK.

use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::str::FromStr;

/// A single attribute value as stored/read from the document store.
///
/// Numeric values are carried as `Decimal` rather than `f64` so that
/// `incrementBy` accumulates exactly (`spec.md` §8 invariant 3) and so that
/// round-tripping through DynamoDB's string-encoded `N` type never drifts.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    /// UTF-8 string. Compound-key components embed directly as this variant.
    S(String),
    /// Arbitrary-precision decimal number.
    N(Decimal),
    /// Opaque binary blob.
    B(Vec<u8>),
    Ss(Vec<String>),
    Ns(Vec<Decimal>),
    Bs(Vec<Vec<u8>>),
    L(Vec<Value>),
    M(BTreeMap<String, Value>),
}

impl Value {
    #[must_use]
    pub fn string(s: impl Into<String>) -> Self {
        Self::S(s.into())
    }

    #[must_use]
    pub fn number<N: Into<Decimal>>(n: N) -> Self {
        Self::N(n.into())
    }

    /// Returns the string payload, if this value is `S`.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::S(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Returns the decimal payload, if this value is `N`.
    #[must_use]
    pub const fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Self::N(n) => Some(*n),
            _ => None,
        }
    }

    /// Deep equality used for `Field::mutated` on container types.
    #[must_use]
    pub fn deep_eq(&self, other: &Self) -> bool {
        self == other
    }

    /// Ordering used to evaluate query/scan range filters
    /// (`spec.md` §4.5 sort-key comparisons `<, <=, >, >=, between`)
    /// against [`crate::store::memory::MemoryStore`]. `None` when the two
    /// values aren't ordering-comparable (mismatched variants).
    #[must_use]
    pub fn compare(&self, other: &Self) -> Option<std::cmp::Ordering> {
        match (self, other) {
            (Self::N(a), Self::N(b)) => a.partial_cmp(b),
            (Self::S(a), Self::S(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Used to evaluate a `prefix` filter against a string attribute.
    #[must_use]
    pub fn starts_with(&self, prefix: &Self) -> bool {
        match (self, prefix) {
            (Self::S(a), Self::S(b)) => a.starts_with(b.as_str()),
            _ => false,
        }
    }

    /// A short, stable type tag used in validation error messages.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::S(_) => "string",
            Self::N(_) => "number",
            Self::B(_) => "binary",
            Self::Ss(_) => "string_set",
            Self::Ns(_) => "number_set",
            Self::Bs(_) => "binary_set",
            Self::L(_) => "list",
            Self::M(_) => "map",
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::S(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::S(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::N(Decimal::from(n))
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Self::N(Decimal::from(n))
    }
}

impl From<Decimal> for Value {
    fn from(n: Decimal) -> Self {
        Self::N(n)
    }
}

/// Parses the canonical decimal text representation DynamoDB uses for its
/// `N` attribute type.
pub fn parse_number(text: &str) -> Result<Decimal, rust_decimal::Error> {
    Decimal::from_str(text)
}
