//! Entity descriptors: the "explicit class descriptor" design note in
//! `spec.md` §9, generated by [`crate::entity!`] rather than discovered
//! reflectively. Mirrors the shape of the teacher's
//! `icydb_core::model::entity`/`icydb_core::model::field` pair.

pub mod index;

pub use index::{IndexDef, Projection};

use crate::error::{Error, Result};
use crate::field::KeyRole;
use crate::value::Value;
use std::collections::HashSet;

///
/// FieldKind
///
/// The wire-level shape of a declared field, used only for class
/// preparation checks (e.g. "numeric fields may carry `pendingIncrement`")
/// — not for (de)serialization, which the generated entity struct's typed
/// accessors handle directly via `FieldType`.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FieldKind {
    String,
    Bool,
    Number,
    Binary,
    StringSet,
    NumberSet,
    BinarySet,
    List,
    Map,
}

impl FieldKind {
    #[must_use]
    pub const fn is_numeric(self) -> bool {
        matches!(self, Self::Number)
    }
}

///
/// FieldDescriptor
///
/// Static metadata for one declared field, shared by every `Model<E>`
/// built from the owning `EntityDescriptor`.
///

#[derive(Clone, Copy, Debug)]
pub struct FieldDescriptor {
    pub name: &'static str,
    pub key_role: KeyRole,
    pub kind: FieldKind,
    pub optional: bool,
    pub immutable: bool,
    /// Populates the field at CREATE/CREATE_OR_PUT time when the caller
    /// omits it (`spec.md` §4.3 "apply defaults (only when the item is
    /// new)"). A sort-key component is the sole key-field role allowed one
    /// per `spec.md` §3 ("A field declared for a key must be ... have no
    /// default (exception: a sort-key component may have a default)");
    /// ordinary (non-key) fields may always declare one.
    pub default: Option<fn() -> Value>,
}

///
/// EntityDescriptor
///
/// One-time, class-level metadata: the declared field list, key field
/// ordering, and index definitions (`spec.md` §4.3 "class preparation").
/// `'static` and independent of any runtime configuration — see
/// `DESIGN.md` Open Question 2.
///

#[derive(Clone, Copy, Debug)]
pub struct EntityDescriptor {
    pub name: &'static str,
    pub fields: &'static [FieldDescriptor],
    pub indexes: &'static [IndexDef],
    /// The attribute name of the declared expire-epoch field, if any
    /// (`spec.md` §4.3 "TTL").
    pub ttl_field: Option<&'static str>,
}

impl EntityDescriptor {
    #[must_use]
    pub fn partition_fields(&self) -> Vec<&'static FieldDescriptor> {
        self.fields
            .iter()
            .filter(|f| matches!(f.key_role, KeyRole::Partition))
            .collect()
    }

    #[must_use]
    pub fn sort_fields(&self) -> Vec<&'static FieldDescriptor> {
        self.fields
            .iter()
            .filter(|f| matches!(f.key_role, KeyRole::Sort))
            .collect()
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&'static FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Class preparation (`spec.md` §4.3): validates declared
    /// KEY/SORT_KEY/FIELDS/INDEXES once. `entity!` calls this from the
    /// `OnceLock` it wraps `descriptor()` in, so it runs exactly once per
    /// process regardless of call count.
    ///
    /// # Errors
    /// [`Error::ReservedName`] for a field named `_id`/`_sk`/`_c_*`
    /// (reserved for derived key/index attributes) or a name reused by
    /// two fields; key-field invariant violations
    /// ([`Error::InvalidFieldOption`]); malformed index definitions
    /// ([`Error::MalformedIndex`], via [`index::validate_indexes`]).
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for field in self.fields {
            if field.name == "_id" || field.name == "_sk" || field.name.starts_with("_c_") {
                return Err(Error::ReservedName(field.name.to_owned()));
            }
            if !seen.insert(field.name) {
                return Err(Error::ReservedName(format!(
                    "duplicate field name `{}`",
                    field.name
                )));
            }
            let is_sort_key = matches!(field.key_role, KeyRole::Sort);
            if !matches!(field.key_role, KeyRole::None) {
                if field.optional {
                    return Err(Error::InvalidFieldOption {
                        field: field.name,
                        reason: "key fields must not be optional".to_owned(),
                    });
                }
                if !field.immutable {
                    return Err(Error::InvalidFieldOption {
                        field: field.name,
                        reason: "key fields must be immutable".to_owned(),
                    });
                }
                if field.default.is_some() && !is_sort_key {
                    return Err(Error::InvalidFieldOption {
                        field: field.name,
                        reason: "only a sort-key component may declare a default".to_owned(),
                    });
                }
            }
        }
        if self.partition_fields().is_empty() {
            return Err(Error::MalformedIndex {
                index: self.name,
                reason: "an entity must declare at least one partition-key field".to_owned(),
            });
        }
        if let Some(ttl_field) = self.ttl_field {
            if self.field(ttl_field).is_none() {
                return Err(Error::MalformedIndex {
                    index: self.name,
                    reason: format!("declared TTL field `{ttl_field}` does not exist"),
                });
            }
        }
        index::validate_indexes(self)?;
        Ok(())
    }
}

///
/// Entity
///
/// Implemented by types generated via [`crate::entity!`]. Bridges a
/// user-facing struct to its static descriptor and to the untyped field
/// vector a [`crate::item::Model`] carries.
///

pub trait Entity: Sized + Send + Sync + 'static {
    /// The table this entity lives in. Distinct entities may share a
    /// table (e.g. to co-locate via a shared partition key prefix).
    const TABLE: &'static str;

    fn descriptor() -> &'static EntityDescriptor;
}
