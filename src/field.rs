//! Per-cell field state (`spec.md` §3 "Field", §4.1, §9 design note 2).
//!
//! Each declared attribute of an entity is modeled as one `Field<T>`: a
//! small value struct carrying the initial (as read from the store) and
//! current value, plus read/written flags. There is no reflective
//! getter/setter indirection — accessors mutate the cell directly.

use crate::error::{Error, Result};
use crate::schema::SchemaAdapter;
use crate::store::{Condition, UpdateOp};
use crate::value::Value;
use rust_decimal::Decimal;

///
/// KeyRole
///
/// Whether a field participates in the compound key, and if so which half.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum KeyRole {
    Partition,
    Sort,
    None,
}

/// Bridges a Rust type to/from the store's wire `Value`. Implement this for
/// any type used as a field's Rust-side representation.
pub trait FieldType: Clone + PartialEq {
    fn to_value(&self) -> Value;
    fn from_value(value: &Value) -> Result<Self>
    where
        Self: Sized;
}

/// Marks a [`FieldType`] as numeric, enabling [`Field::increment_by`].
pub trait NumericField: FieldType {
    fn as_decimal(&self) -> Decimal;
    fn from_decimal(value: Decimal) -> Self;
}

impl FieldType for Value {
    fn to_value(&self) -> Value {
        self.clone()
    }

    fn from_value(value: &Value) -> Result<Self> {
        Ok(value.clone())
    }
}

/// `Model<E>` stores every field untyped as `Field<Value>` (`SPEC_FULL.md`
/// §4.3); generated typed accessors transcode through `FieldType` at the
/// boundary. This impl lets `Field<Value>::increment_by` work directly so
/// that boundary doesn't need a separate untyped increment path.
impl NumericField for Value {
    fn as_decimal(&self) -> Decimal {
        Value::as_decimal(self).unwrap_or(Decimal::ZERO)
    }

    fn from_decimal(value: Decimal) -> Self {
        Value::N(value)
    }
}

impl FieldType for String {
    fn to_value(&self) -> Value {
        Value::S(self.clone())
    }

    fn from_value(value: &Value) -> Result<Self> {
        value
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| type_mismatch("string", value))
    }
}

impl FieldType for bool {
    fn to_value(&self) -> Value {
        Value::Bool(*self)
    }

    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Bool(b) => Ok(*b),
            _ => Err(type_mismatch("bool", value)),
        }
    }
}

impl FieldType for Decimal {
    fn to_value(&self) -> Value {
        Value::N(*self)
    }

    fn from_value(value: &Value) -> Result<Self> {
        value.as_decimal().ok_or_else(|| type_mismatch("number", value))
    }
}

impl NumericField for Decimal {
    fn as_decimal(&self) -> Decimal {
        *self
    }

    fn from_decimal(value: Decimal) -> Self {
        value
    }
}

impl FieldType for i64 {
    fn to_value(&self) -> Value {
        Value::N(Decimal::from(*self))
    }

    fn from_value(value: &Value) -> Result<Self> {
        use rust_decimal::prelude::ToPrimitive;
        value
            .as_decimal()
            .and_then(|d| d.to_i64())
            .ok_or_else(|| type_mismatch("i64", value))
    }
}

impl NumericField for i64 {
    fn as_decimal(&self) -> Decimal {
        Decimal::from(*self)
    }

    fn from_decimal(value: Decimal) -> Self {
        use rust_decimal::prelude::ToPrimitive;
        value.to_i64().unwrap_or(if value.is_sign_negative() {
            i64::MIN
        } else {
            i64::MAX
        })
    }
}

impl FieldType for f64 {
    fn to_value(&self) -> Value {
        Value::N(Decimal::try_from(*self).unwrap_or(Decimal::ZERO))
    }

    fn from_value(value: &Value) -> Result<Self> {
        use rust_decimal::prelude::ToPrimitive;
        value
            .as_decimal()
            .and_then(|d| d.to_f64())
            .ok_or_else(|| type_mismatch("f64", value))
    }
}

impl NumericField for f64 {
    fn as_decimal(&self) -> Decimal {
        Decimal::try_from(*self).unwrap_or(Decimal::ZERO)
    }

    fn from_decimal(value: Decimal) -> Self {
        use rust_decimal::prelude::ToPrimitive;
        value.to_f64().unwrap_or(0.0)
    }
}

impl FieldType for Vec<u8> {
    fn to_value(&self) -> Value {
        Value::B(self.clone())
    }

    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::B(b) => Ok(b.clone()),
            _ => Err(type_mismatch("binary", value)),
        }
    }
}

impl<T: FieldType> FieldType for Vec<T> {
    fn to_value(&self) -> Value {
        Value::L(self.iter().map(FieldType::to_value).collect())
    }

    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::L(items) => items.iter().map(T::from_value).collect(),
            _ => Err(type_mismatch("list", value)),
        }
    }
}

impl FieldType for std::collections::HashSet<String> {
    fn to_value(&self) -> Value {
        let mut items: Vec<String> = self.iter().cloned().collect();
        items.sort();
        Value::Ss(items)
    }

    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Ss(items) => Ok(items.iter().cloned().collect()),
            _ => Err(type_mismatch("string_set", value)),
        }
    }
}

impl FieldType for std::collections::BTreeMap<String, Value> {
    fn to_value(&self) -> Value {
        Value::M(self.clone())
    }

    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::M(map) => Ok(map.clone()),
            _ => Err(type_mismatch("map", value)),
        }
    }
}

fn type_mismatch(expected: &str, found: &Value) -> Error {
    Error::Validation {
        field: String::new(),
        message: format!("expected {expected}, found {}", found.type_name()),
    }
}

///
/// Field
///
/// Holds `{ name, keyRole, optional, immutable, initial, current, read,
/// written, pendingIncrement }` (`spec.md` §3). Every accessor mutates the
/// cell directly; there is no separate "commit" step for the field itself
/// — `update_expression`/`condition_expression` read off the current state
/// whenever the batcher asks for them.
///

#[derive(Clone, Debug)]
pub struct Field<T: FieldType> {
    name: &'static str,
    key_role: KeyRole,
    optional: bool,
    immutable: bool,
    initial: Option<T>,
    current: Option<T>,
    read: bool,
    written: bool,
    pending_increment: Option<Decimal>,
    omitted: bool,
}

impl<T: FieldType> Field<T> {
    /// A field as it was read from the store, with a value present.
    #[must_use]
    pub fn loaded(name: &'static str, key_role: KeyRole, optional: bool, immutable: bool, value: T) -> Self {
        Self {
            name,
            key_role,
            optional,
            immutable,
            initial: Some(value.clone()),
            current: Some(value),
            read: false,
            written: false,
            pending_increment: None,
            omitted: false,
        }
    }

    /// A field absent from the store at read time (GET miss, or a fresh
    /// CREATE shell before any value is supplied).
    #[must_use]
    pub const fn missing(name: &'static str, key_role: KeyRole, optional: bool, immutable: bool) -> Self {
        Self {
            name,
            key_role,
            optional,
            immutable,
            initial: None,
            current: None,
            read: false,
            written: false,
            pending_increment: None,
            omitted: false,
        }
    }

    /// A field populated by the caller at CREATE/CREATE_OR_PUT time: no
    /// prior store state, so `initial` stays `None`.
    #[must_use]
    pub fn created(name: &'static str, key_role: KeyRole, optional: bool, immutable: bool, value: Option<T>) -> Self {
        let written = value.is_some();
        Self {
            name,
            key_role,
            optional,
            immutable,
            initial: None,
            current: value,
            read: false,
            written,
            pending_increment: None,
            omitted: false,
        }
    }

    /// A field withheld by a secondary index's projection. `get()` on this
    /// field always fails with [`Error::ProjectionOmitted`].
    #[must_use]
    pub const fn omitted(name: &'static str, key_role: KeyRole) -> Self {
        Self {
            name,
            key_role,
            optional: true,
            immutable: false,
            initial: None,
            current: None,
            read: false,
            written: false,
            pending_increment: None,
            omitted: true,
        }
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub const fn key_role(&self) -> KeyRole {
        self.key_role
    }

    #[must_use]
    pub const fn optional(&self) -> bool {
        self.optional
    }

    /// Marks the field read and returns its current value.
    ///
    /// # Errors
    /// [`Error::ProjectionOmitted`] if this field was withheld by the
    /// active index projection.
    pub fn get(&mut self) -> Result<Option<&T>> {
        if self.omitted {
            return Err(Error::ProjectionOmitted(self.name));
        }
        self.read = true;
        Ok(self.current.as_ref())
    }

    /// Returns the current value without marking the field read. Used
    /// internally to build update/condition fragments and by read-only
    /// inspection paths that must not participate in the access-tracking
    /// read set.
    #[must_use]
    pub const fn peek(&self) -> Option<&T> {
        self.current.as_ref()
    }

    /// Sets the field to a new value.
    ///
    /// # Errors
    /// [`Error::ImmutableKey`] if this is a key field (key fields are
    /// always immutable and set only at construction via [`Self::created`]
    /// / [`Self::loaded`]); [`Error::ImmutableField`] if the field is
    /// immutable and already initialized; a schema error if `value` fails
    /// validation, in which case the field's prior state is left intact.
    pub fn set(&mut self, value: T, schema: &dyn SchemaAdapter) -> Result<()> {
        if !matches!(self.key_role, KeyRole::None) {
            return Err(Error::ImmutableKey(self.name));
        }
        if self.immutable && self.current.is_some() {
            return Err(Error::ImmutableField(self.name));
        }
        let wire = value.to_value();
        schema.validate(&wire).map_err(|e| Error::Validation {
            field: self.name.to_owned(),
            message: e.to_string(),
        })?;
        self.current = Some(value);
        self.written = true;
        self.pending_increment = None;
        Ok(())
    }

    /// True iff the current value differs from the initial value (deep
    /// equality for container types), per `spec.md` §3 "mutated".
    #[must_use]
    pub fn mutated(&self) -> bool {
        match (&self.initial, &self.current) {
            (None, None) => false,
            (Some(a), Some(b)) => !a.to_value().deep_eq(&b.to_value()),
            _ => true,
        }
    }

    /// `accessed = read ∨ written` (`spec.md` §3).
    #[must_use]
    pub const fn accessed(&self) -> bool {
        self.read || self.written
    }

    #[must_use]
    pub const fn was_read(&self) -> bool {
        self.read
    }

    #[must_use]
    pub const fn was_written(&self) -> bool {
        self.written
    }

    #[must_use]
    pub const fn initial(&self) -> Option<&T> {
        self.initial.as_ref()
    }

    /// The fragment to merge into the item's `UpdateExpression`, or `None`
    /// if this field contributes nothing this commit (`spec.md` §4.1).
    #[must_use]
    pub fn update_expression(&self) -> Option<UpdateOp> {
        if !self.written {
            return None;
        }
        match &self.current {
            None => Some(UpdateOp::Remove(self.name.to_owned())),
            Some(current) => {
                if let Some(delta) = self.pending_increment {
                    if self.initial.is_some() && !self.read {
                        return Some(UpdateOp::Increment(self.name.to_owned(), Value::N(delta)));
                    }
                }
                Some(UpdateOp::Set(self.name.to_owned(), current.to_value()))
            }
        }
    }

    /// The fragment to merge into the item's `ConditionExpression` for
    /// CAS, or `None` if this field's access needs no guard this commit
    /// (`spec.md` §4.1).
    #[must_use]
    pub fn condition_expression(&self) -> Option<Condition> {
        if !self.accessed() {
            return None;
        }
        if self.pending_increment.is_some() {
            return match &self.initial {
                None => None,
                Some(initial) if self.read => {
                    Some(Condition::Equals(self.name.to_owned(), initial.to_value()))
                }
                Some(_) => None,
            };
        }
        match &self.initial {
            None => Some(Condition::AttributeNotExists(self.name.to_owned())),
            Some(initial) => Some(Condition::Equals(self.name.to_owned(), initial.to_value())),
        }
    }
}

impl<T: NumericField> Field<T> {
    /// Records a pending delta; sets current to `initial + cumulativeDelta`
    /// (`spec.md` §4.1, §8 invariant 3).
    ///
    /// Per the Open Question in `spec.md` §9 ("transitioning between
    /// `set` and `incrementBy`"), this crate allows switching from a prior
    /// `set` into increment mode as long as doing so would not silently
    /// discard a condition the caller already depends on: once the field
    /// has been read, or set to a value that would require binding a
    /// known initial value, switching modes is rejected.
    ///
    /// # Errors
    /// [`Error::InvalidFieldOption`] if the field has already been read,
    /// or was set while its initial value was known (and so would need a
    /// match-on-initial condition that `incrementBy` cannot express).
    pub fn increment_by(&mut self, delta: Decimal) -> Result<()> {
        let ordinary_set_already_conditioned =
            self.written && self.pending_increment.is_none() && self.initial.is_some();
        if self.read || ordinary_set_already_conditioned {
            return Err(Error::InvalidFieldOption {
                field: self.name,
                reason: "cannot switch to incrementBy once the field has been read or conditioned by a prior set".to_owned(),
            });
        }
        let total_delta = self.pending_increment.unwrap_or(Decimal::ZERO) + delta;
        self.pending_increment = Some(total_delta);
        let base = self
            .initial
            .as_ref()
            .map(NumericField::as_decimal)
            .unwrap_or(Decimal::ZERO);
        self.current = Some(T::from_decimal(base + total_delta));
        self.written = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::NoopSchema;

    #[test]
    fn accessed_is_false_until_get_or_set() {
        let field: Field<i64> = Field::missing("n", KeyRole::None, true, false);
        assert!(!field.accessed());
    }

    #[test]
    fn get_marks_accessed() {
        let mut field: Field<i64> = Field::loaded("n", KeyRole::None, true, false, 5);
        assert!(!field.accessed());
        let _ = field.get().unwrap();
        assert!(field.accessed());
    }

    #[test]
    fn set_marks_accessed_and_mutated() {
        let mut field: Field<i64> = Field::missing("n", KeyRole::None, true, false);
        field.set(10, &NoopSchema).unwrap();
        assert!(field.accessed());
        assert!(field.mutated());
    }

    #[test]
    fn increment_accumulates_over_initial() {
        let mut field: Field<i64> = Field::loaded("n", KeyRole::None, true, false, 5);
        field.increment_by(Decimal::from(1)).unwrap();
        field.increment_by(Decimal::from(2)).unwrap();
        assert_eq!(*field.peek().unwrap(), 8);
    }

    #[test]
    fn increment_is_unconditional_when_initial_known_and_unread() {
        let mut field: Field<i64> = Field::loaded("n", KeyRole::None, true, false, 5);
        field.increment_by(Decimal::from(1)).unwrap();
        assert!(field.condition_expression().is_none());
        assert!(matches!(
            field.update_expression(),
            Some(UpdateOp::Increment(_, _))
        ));
    }

    #[test]
    fn increment_is_conditional_after_read() {
        let mut field: Field<i64> = Field::loaded("n", KeyRole::None, true, false, 5);
        let _ = field.get().unwrap();
        field.increment_by(Decimal::from(1)).unwrap();
        assert!(matches!(
            field.condition_expression(),
            Some(Condition::Equals(_, _))
        ));
    }

    #[test]
    fn increment_against_missing_field_is_plain_unconditional_set() {
        let mut field: Field<i64> = Field::missing("n", KeyRole::None, true, false);
        field.increment_by(Decimal::from(3)).unwrap();
        assert_eq!(*field.peek().unwrap(), 3);
        assert!(field.condition_expression().is_none());
        assert!(matches!(field.update_expression(), Some(UpdateOp::Set(_, _))));
    }

    #[test]
    fn set_then_increment_rejected_once_conditioned() {
        let mut field: Field<i64> = Field::loaded("n", KeyRole::None, true, false, 5);
        field.set(9, &NoopSchema).unwrap();
        let err = field.increment_by(Decimal::from(1)).unwrap_err();
        assert!(matches!(err, Error::InvalidFieldOption { .. }));
    }

    #[test]
    fn immutable_field_rejects_second_set() {
        let mut field: Field<i64> = Field::created("n", KeyRole::None, true, true, Some(1));
        let err = field.set(2, &NoopSchema).unwrap_err();
        assert!(matches!(err, Error::ImmutableField("n")));
    }

    #[test]
    fn omitted_field_errors_on_get() {
        let mut field: Field<i64> = Field::omitted("n", KeyRole::None);
        assert!(matches!(field.get(), Err(Error::ProjectionOmitted("n"))));
    }
}
