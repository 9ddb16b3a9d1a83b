//! The per-instance lifecycle (`spec.md` §3 "Item", §4.3), realized as
//! `Model<E>`.
//!
//! A `Model<E>` wraps the entity's declared fields as an untyped
//! `Vec<Field<Value>>` indexed by the descriptor's field order
//! (`SPEC_FULL.md` §4.3); generated typed accessors on `Model<E>`
//! transcode through `FieldType` at each call.

use crate::error::{Error, Result};
use crate::field::{Field, FieldType, KeyRole};
use crate::model::{index, EntityDescriptor};
use crate::schema::SchemaAdapter;
use crate::store::{Condition, ItemKey, UpdateOp, WriteOp};
use crate::value::Value;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::Arc;

/// How long after its declared expiry an item is still treated as expired
/// (a miss) rather than as anomalously-surviving data the caller should
/// see as-is (`spec.md` §4.3 "TTL", "within a bounded window").  Chosen to
/// match DynamoDB's documented TTL sweep latency (items can outlive their
/// expiry by up to 48h before the background sweeper deletes them).
pub const TTL_SWEEP_WINDOW_SECS: i64 = 48 * 3600;

///
/// ItemSource
///
/// Tagged variant replacing source sentinels (`spec.md` §9 design note 4):
/// which lifecycle produced this `Model` governs its write semantics.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ItemSource {
    Create,
    Get,
    CreateOrPut,
    Update,
}

///
/// Model
///
/// The per-instance handle a transaction closure receives from
/// `get`/`create`/`update`/`createOrPut` (`spec.md` §4.6). Destroyed when
/// the transaction ends; never persisted itself.
///

pub struct Model<E> {
    descriptor: &'static EntityDescriptor,
    schema: Arc<dyn SchemaAdapter>,
    source: ItemSource,
    fields: Vec<Field<Value>>,
    /// Indices of fields explicitly bound to a caller-supplied "expected"
    /// value for `CreateOrPut`/blind `Update` sources. Distinguishes "the
    /// caller asserted this field's prior value" from "this field simply
    /// has no prior value" when collecting conditions for those two
    /// sources (`spec.md` §4.3 "UPDATE-sourced items skip
    /// attribute_not_exists-style fragments").
    conditioned: Vec<bool>,
    id: String,
    sk: Option<String>,
    is_new: bool,
    marked_for_delete: bool,
    stale: bool,
    _marker: PhantomData<fn() -> E>,
}

impl<E> Model<E> {
    fn field_index(&self, name: &'static str) -> usize {
        self.descriptor
            .fields
            .iter()
            .position(|f| f.name == name)
            .unwrap_or_else(|| panic!("field `{name}` not declared on entity `{}`", self.descriptor.name))
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn sk(&self) -> Option<&str> {
        self.sk.as_deref()
    }

    #[must_use]
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    #[must_use]
    pub(crate) const fn source(&self) -> ItemSource {
        self.source
    }

    #[must_use]
    pub fn mutated(&self) -> bool {
        self.fields.iter().any(Field::mutated)
    }

    #[must_use]
    pub(crate) fn accessed_any(&self) -> bool {
        self.fields.iter().any(Field::accessed)
    }

    pub fn mark_for_delete(&mut self) {
        self.marked_for_delete = true;
    }

    #[must_use]
    pub(crate) const fn is_marked_for_delete(&self) -> bool {
        self.marked_for_delete
    }

    pub(crate) fn invalidate(&mut self) {
        self.stale = true;
    }

    #[must_use]
    pub(crate) const fn is_stale(&self) -> bool {
        self.stale
    }

    #[must_use]
    pub(crate) fn key(&self) -> ItemKey {
        ItemKey::new(self.id.clone(), self.sk.clone())
    }

    /// Marks the field read and returns its typed value.
    ///
    /// # Errors
    /// See [`Field::get`]; plus a validation error if the stored `Value`
    /// doesn't decode as `T`.
    pub fn get_typed<T: FieldType>(&mut self, name: &'static str) -> Result<Option<T>> {
        self.check_not_stale()?;
        let idx = self.field_index(name);
        let raw = self.fields[idx].get()?;
        raw.map(T::from_value).transpose()
    }

    /// Sets a field's typed value.
    ///
    /// # Errors
    /// See [`Field::set`].
    pub fn set_typed<T: FieldType>(&mut self, name: &'static str, value: T) -> Result<()> {
        self.check_not_stale()?;
        let idx = self.field_index(name);
        self.fields[idx].set(value.to_value(), self.schema.as_ref())
    }

    /// Increments a numeric field by `delta`.
    ///
    /// # Errors
    /// See [`Field::increment_by`].
    pub fn increment_typed(&mut self, name: &'static str, delta: Decimal) -> Result<()> {
        self.check_not_stale()?;
        let idx = self.field_index(name);
        self.fields[idx].increment_by(delta)
    }

    fn check_not_stale(&self) -> Result<()> {
        if self.stale {
            return Err(Error::StaleCachedModel);
        }
        Ok(())
    }

    /// Every declared field's current value, keyed by attribute name, for
    /// assembling a put item or computing secondary-index derived
    /// attributes. Excludes fields with no current value.
    #[must_use]
    pub(crate) fn current_values(&self) -> BTreeMap<String, Value> {
        self.fields
            .iter()
            .filter_map(|f| f.peek().map(|v| (f.name().to_owned(), v.clone())))
            .collect()
    }

    /// Full put descriptor (`spec.md` §4.3 "Put descriptor").
    #[must_use]
    pub(crate) fn put_descriptor(&self) -> WriteOp {
        let mut item = self.current_values();
        item.insert("_id".to_owned(), Value::S(self.id.clone()));
        if let Some(sk) = &self.sk {
            item.insert("_sk".to_owned(), Value::S(sk.clone()));
        }
        for idx in self.descriptor.indexes {
            if let Some(derived) = index::derived_attributes(idx, self.descriptor, &item) {
                item.extend(derived);
            }
        }

        let not_exists = Condition::AttributeNotExists("_id".to_owned());
        let condition = match self.source {
            ItemSource::Create => Some(not_exists),
            ItemSource::CreateOrPut => {
                let expected: Vec<Condition> = self
                    .fields
                    .iter()
                    .zip(&self.conditioned)
                    .filter(|(_, bound)| **bound)
                    .filter_map(|(f, _)| f.condition_expression())
                    .collect();
                match Condition::and(expected) {
                    Some(expected) => Some(Condition::Or(vec![not_exists, expected])),
                    None => Some(not_exists),
                }
            }
            // Reached only internally: the batcher never issues a Put for
            // a GET- or UPDATE-sourced item that wasn't also mutated from
            // nothing (`spec.md` §4.3 "Otherwise reached only
            // internally").
            ItemSource::Get | ItemSource::Update => Some(not_exists),
        };

        WriteOp::Put {
            key: self.key(),
            item,
            condition,
        }
    }

    /// Partial update descriptor (`spec.md` §4.3 "Update descriptor"), or
    /// `None` if no field carries a mutation.
    #[must_use]
    pub(crate) fn update_descriptor(&self) -> Option<WriteOp> {
        let mut ops: Vec<UpdateOp> = self.fields.iter().filter_map(Field::update_expression).collect();
        if ops.is_empty() {
            return None;
        }

        // Secondary-index derived attributes are part of the write path in
        // general, not just PUT (`spec.md` §4.7): an UPDATE-sourced write
        // that actually touches the row must keep `_c_*` attributes current
        // too, since `put_descriptor` is only reached for a brand-new row
        // with zero field mutations.
        if !self.descriptor.indexes.is_empty() {
            let current = self.current_values();
            for idx in self.descriptor.indexes {
                if let Some(derived) = index::derived_attributes(idx, self.descriptor, &current) {
                    for (attr, value) in derived {
                        ops.push(UpdateOp::Set(attr, value));
                    }
                }
            }
        }

        let conditions: Vec<Condition> = match self.source {
            ItemSource::CreateOrPut | ItemSource::Update => self
                .fields
                .iter()
                .zip(&self.conditioned)
                .filter(|(_, bound)| **bound)
                .filter_map(|(f, _)| f.condition_expression())
                .collect(),
            ItemSource::Create | ItemSource::Get => {
                let mut conditions: Vec<Condition> = self.fields.iter().filter_map(Field::condition_expression).collect();
                if !self.is_new {
                    conditions.insert(0, Condition::AttributeExists("_id".to_owned()));
                } else {
                    conditions.insert(0, Condition::AttributeNotExists("_id".to_owned()));
                }
                conditions
            }
        };

        Some(WriteOp::Update {
            key: self.key(),
            ops,
            condition: Condition::and(conditions),
        })
    }

    /// Delete descriptor: a `Delete`, conditioned on every field the
    /// transaction actually accessed before marking it for deletion
    /// (`spec.md` §4.4 "scheduled for delete").
    #[must_use]
    pub(crate) fn delete_descriptor(&self) -> WriteOp {
        let conditions: Vec<Condition> = self.fields.iter().filter_map(Field::condition_expression).collect();
        WriteOp::Delete {
            key: self.key(),
            condition: Condition::and(conditions),
        }
    }

    /// `ConditionCheck` for a read-only, accessed item that must still
    /// participate in the transactional commit so a concurrent writer
    /// invalidates it (`spec.md` §4.4 "existing, read-only").
    #[must_use]
    pub(crate) fn condition_check(&self) -> Option<WriteOp> {
        let conditions: Vec<Condition> = self.fields.iter().filter_map(Field::condition_expression).collect();
        Condition::and(conditions).map(|condition| WriteOp::ConditionCheck {
            key: self.key(),
            condition,
        })
    }
}

/// Free constructors. Kept outside `impl<E> Model<E>` purely for
/// readability; all still produce `Model<E>`.
impl<E> Model<E> {
    /// GET that found data: every field loaded with its store-native
    /// value as both initial and current.
    ///
    /// # Errors
    /// [`Error::Validation`] if a stored value doesn't decode against its
    /// declared shape (surfaced lazily per field, not eagerly here);
    /// [`Error::BadKeyEncoding`] if `_id`/`_sk` fail to decode against the
    /// declared key components.
    pub(crate) fn from_store_item(
        descriptor: &'static EntityDescriptor,
        schema: Arc<dyn SchemaAdapter>,
        raw: BTreeMap<String, Value>,
    ) -> Result<Self> {
        let id = raw
            .get("_id")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Validation {
                field: "_id".to_owned(),
                message: "missing partition key attribute".to_owned(),
            })?
            .to_owned();
        let sk = raw.get("_sk").and_then(Value::as_str).map(str::to_owned);

        let fields = descriptor
            .fields
            .iter()
            .map(|fd| match raw.get(fd.name) {
                Some(value) => Field::loaded(fd.name, fd.key_role, fd.optional, fd.immutable, value.clone()),
                None => Field::missing(fd.name, fd.key_role, fd.optional, fd.immutable),
            })
            .collect();

        Ok(Self {
            descriptor,
            schema,
            source: ItemSource::Get,
            fields,
            conditioned: vec![false; descriptor.fields.len()],
            id,
            sk,
            is_new: false,
            marked_for_delete: false,
            stale: false,
            _marker: PhantomData,
        })
    }

    /// GET that found nothing: either a pure miss (caller handles
    /// `None`), or, when `create_if_missing` is set, an empty shell with
    /// `is_new = true` (`spec.md` §3 "Item" lifecycle). `key_values` holds
    /// the partition/sort key component values the caller looked up by;
    /// those fields are populated (they're already known), every other
    /// declared field starts `Field::missing`.
    pub(crate) fn empty_shell(
        descriptor: &'static EntityDescriptor,
        schema: Arc<dyn SchemaAdapter>,
        key_values: BTreeMap<String, Value>,
    ) -> Result<Self> {
        let fields = descriptor
            .fields
            .iter()
            .map(|fd| -> Result<Field<Value>> {
                match key_values.get(fd.name) {
                    Some(value) if !matches!(fd.key_role, KeyRole::None) => {
                        Ok(Field::created(fd.name, fd.key_role, fd.optional, fd.immutable, Some(value.clone())))
                    }
                    _ => {
                        let mut field = Field::missing(fd.name, fd.key_role, fd.optional, fd.immutable);
                        // `empty_shell` is the other "brand-new item" path
                        // (`tx.get(..., create_if_missing: true)`), so
                        // defaults apply here too (`spec.md` §4.3).
                        if let Some(default_fn) = fd.default {
                            field.set(default_fn(), schema.as_ref())?;
                        }
                        Ok(field)
                    }
                }
            })
            .collect::<Result<_>>()?;

        let partition_values: Vec<(&'static str, &Value)> = descriptor
            .partition_fields()
            .into_iter()
            .map(|fd| {
                key_values
                    .get(fd.name)
                    .map(|v| (fd.name, v))
                    .ok_or(Error::InvalidParameter(format!("missing partition field `{}`", fd.name)))
            })
            .collect::<Result<_>>()?;
        let id = crate::key::encode(&partition_values)?;

        let sort_fields = descriptor.sort_fields();
        let sk = if sort_fields.is_empty() {
            None
        } else {
            let sort_values: Vec<(&'static str, &Value)> = sort_fields
                .into_iter()
                .map(|fd| {
                    key_values
                        .get(fd.name)
                        .map(|v| (fd.name, v))
                        .ok_or(Error::InvalidParameter(format!("missing sort field `{}`", fd.name)))
                })
                .collect::<Result<_>>()?;
            Some(crate::key::encode(&sort_values)?)
        };

        Ok(Self {
            descriptor,
            schema,
            source: ItemSource::Create,
            fields,
            conditioned: vec![false; descriptor.fields.len()],
            id,
            sk,
            is_new: true,
            marked_for_delete: false,
            stale: false,
            _marker: PhantomData,
        })
    }

    /// CREATE: every declared field is populated (or defaulted) by the
    /// caller; no field has a prior store value.
    ///
    /// # Errors
    /// A schema validation error from [`Field::set`] if any supplied value
    /// is rejected.
    pub(crate) fn create(
        descriptor: &'static EntityDescriptor,
        schema: Arc<dyn SchemaAdapter>,
        values: BTreeMap<String, Value>,
    ) -> Result<Self> {
        Self::build(descriptor, schema, ItemSource::Create, values, BTreeMap::new(), None)
    }

    /// CREATE_OR_PUT (upsert): `expected` values condition the put against
    /// concurrent writers; `final_values` is what gets written.
    ///
    /// # Errors
    /// See [`Self::create`].
    pub(crate) fn create_or_put(
        descriptor: &'static EntityDescriptor,
        schema: Arc<dyn SchemaAdapter>,
        expected: BTreeMap<String, Value>,
        final_values: BTreeMap<String, Value>,
    ) -> Result<Self> {
        Self::build(descriptor, schema, ItemSource::CreateOrPut, final_values, expected, None)
    }

    /// Blind UPDATE: no prior GET. `expected` values CAS-guard the write;
    /// `changes` is what gets written. Unlike CREATE, the row's key is
    /// already known as `key` rather than recoverable from `changes` (a
    /// caller naming a blind update's target by key has no reason to repeat
    /// the key fields among the values it's changing).
    ///
    /// # Errors
    /// See [`Self::create`].
    pub(crate) fn update_blind(
        descriptor: &'static EntityDescriptor,
        schema: Arc<dyn SchemaAdapter>,
        key: ItemKey,
        expected: BTreeMap<String, Value>,
        changes: BTreeMap<String, Value>,
    ) -> Result<Self> {
        let mut model = Self::build(descriptor, schema, ItemSource::Update, changes, expected, Some(key))?;
        model.is_new = false;
        Ok(model)
    }

    fn build(
        descriptor: &'static EntityDescriptor,
        schema: Arc<dyn SchemaAdapter>,
        source: ItemSource,
        values: BTreeMap<String, Value>,
        expected: BTreeMap<String, Value>,
        key_override: Option<ItemKey>,
    ) -> Result<Self> {
        let mut fields = Vec::with_capacity(descriptor.fields.len());
        let mut conditioned = Vec::with_capacity(descriptor.fields.len());
        for fd in descriptor.fields {
            let is_conditioned = expected.contains_key(fd.name);
            conditioned.push(is_conditioned);
            let mut field = if let Some(expected_value) = expected.get(fd.name) {
                Field::loaded(fd.name, fd.key_role, fd.optional, fd.immutable, expected_value.clone())
            } else {
                Field::missing(fd.name, fd.key_role, fd.optional, fd.immutable)
            };
            if let Some(new_value) = values.get(fd.name) {
                if matches!(fd.key_role, KeyRole::None) {
                    field.set(new_value.clone(), schema.as_ref())?;
                } else {
                    // Key fields are set once at construction, bypassing
                    // `Field::set`'s immutability guard (which exists to
                    // reject a *second* set, not the first).
                    field = Field::created(fd.name, fd.key_role, fd.optional, fd.immutable, Some(new_value.clone()));
                }
            } else if matches!(source, ItemSource::Create | ItemSource::CreateOrPut) {
                // Defaults apply only to a brand-new item, and only when
                // the caller didn't supply the field itself (`spec.md`
                // §4.3 "apply defaults (only when the item is new)").
                if let Some(default_fn) = fd.default {
                    field.set(default_fn(), schema.as_ref())?;
                }
            }
            fields.push(field);
        }

        let (id, sk) = match key_override {
            Some(key) => (key.partition, key.sort),
            None => {
                let partition_values: Vec<(&'static str, &Value)> = descriptor
                    .partition_fields()
                    .into_iter()
                    .map(|fd| {
                        values
                            .get(fd.name)
                            .map(|v| (fd.name, v))
                            .ok_or(Error::InvalidParameter(format!("missing partition field `{}`", fd.name)))
                    })
                    .collect::<Result<_>>()?;
                let id = crate::key::encode(&partition_values)?;

                let sort_fields = descriptor.sort_fields();
                let sk = if sort_fields.is_empty() {
                    None
                } else {
                    let sort_values: Vec<(&'static str, &Value)> = sort_fields
                        .into_iter()
                        .map(|fd| {
                            values
                                .get(fd.name)
                                .map(|v| (fd.name, v))
                                .ok_or(Error::InvalidParameter(format!("missing sort field `{}`", fd.name)))
                        })
                        .collect::<Result<_>>()?;
                    Some(crate::key::encode(&sort_values)?)
                };
                (id, sk)
            }
        };

        Ok(Self {
            descriptor,
            schema,
            source,
            fields,
            conditioned,
            id,
            sk,
            is_new: matches!(source, ItemSource::Create | ItemSource::CreateOrPut),
            marked_for_delete: false,
            stale: false,
            _marker: PhantomData,
        })
    }
}

/// Whether a loaded item's declared TTL field marks it expired
/// (`spec.md` §4.3 "TTL").
#[must_use]
pub fn is_expired(descriptor: &EntityDescriptor, raw: &BTreeMap<String, Value>, now_epoch_secs: i64) -> bool {
    let Some(ttl_field) = descriptor.ttl_field else {
        return false;
    };
    let Some(epoch) = raw.get(ttl_field).and_then(Value::as_decimal) else {
        return false;
    };
    use rust_decimal::prelude::ToPrimitive;
    let Some(epoch) = epoch.to_i64() else {
        return false;
    };
    epoch <= now_epoch_secs && epoch > now_epoch_secs - TTL_SWEEP_WINDOW_SECS
}
