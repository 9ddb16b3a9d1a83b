//! The schema validation contract consumed by [`crate::field::Field::set`]
//! (`spec.md` §6 "Schema contract"). The actual schema compiler and
//! JSON-schema validator are out of scope (`spec.md` §1) — this crate only
//! consumes the validator's verdict.

use crate::value::Value;
use std::fmt;

///
/// ValidationError
///
/// A structured validation failure naming the field, the rejected value,
/// and a human description (`spec.md` §6).
///

#[derive(Clone, Debug)]
pub struct ValidationError {
    pub field: String,
    pub rejected: Value,
    pub description: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "field `{}` rejected value of type `{}`: {}",
            self.field,
            self.rejected.type_name(),
            self.description
        )
    }
}

impl std::error::Error for ValidationError {}

///
/// SchemaAdapter
///
/// Validates a value against a compiled schema. Implementations wrap
/// whatever schema compiler/JSON-schema validator the deployment uses;
/// this crate never constructs or inspects schemas itself.
///

pub trait SchemaAdapter: Send + Sync {
    fn validate(&self, value: &Value) -> Result<(), ValidationError>;
}

/// A permissive default that accepts every value. Suitable when no
/// external schema validator is wired in, or for tests.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSchema;

impl SchemaAdapter for NoopSchema {
    fn validate(&self, _value: &Value) -> Result<(), ValidationError> {
        Ok(())
    }
}
