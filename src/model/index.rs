//! Secondary index metadata (`spec.md` §3 "Index definition", §4.7).

use super::EntityDescriptor;
use crate::error::{Error, Result};
use crate::value::Value;
use std::collections::BTreeMap;
use std::collections::HashSet;

///
/// Projection
///
/// The attribute set a secondary index materializes for its readers
/// (`spec.md` §3, GLOSSARY "Projection").
///

#[derive(Clone, Copy, Debug)]
pub enum Projection {
    All,
    KeysOnly,
    IncludeOnly(&'static [&'static str]),
}

///
/// IndexDef
///
/// `{name, partitionFieldNames, sortFieldNames?, projection, sparse?}`
/// (`spec.md` §3). If `partition_fields`/`sort_fields` name exactly the
/// base table's key fields, the index aliases `_id`/`_sk`; otherwise the
/// write path materializes `_c_<f1>_<f2>…` derived attributes
/// (`spec.md` §6 "Item wire format").
///

#[derive(Clone, Copy, Debug)]
pub struct IndexDef {
    pub name: &'static str,
    pub partition_fields: &'static [&'static str],
    pub sort_fields: &'static [&'static str],
    pub projection: Projection,
    pub sparse: bool,
}

impl IndexDef {
    /// The derived attribute name for a component group, e.g. partition
    /// fields `[year, make]` → `_c_year_make` (`spec.md` §3).
    #[must_use]
    pub fn derived_attribute(fields: &[&'static str]) -> String {
        format!("_c_{}", fields.join("_"))
    }

    /// Whether this index reuses the base table's own key, per
    /// `spec.md` §3 "If the index reuses the base table's partition/sort
    /// keys it aliases `_id`/`_sk`".
    #[must_use]
    pub fn aliases_base_key(&self, descriptor: &EntityDescriptor) -> bool {
        let base_partition: Vec<&str> = descriptor.partition_fields().iter().map(|f| f.name).collect();
        let base_sort: Vec<&str> = descriptor.sort_fields().iter().map(|f| f.name).collect();
        self.partition_fields == base_partition.as_slice() && self.sort_fields == base_sort.as_slice()
    }
}

/// Validates the index list at class preparation time (`spec.md` §4.7):
/// every named field must exist on the entity, no duplicate field within
/// one index's component list, `IncludeOnly` must not name a key field.
///
/// # Errors
/// [`Error::MalformedIndex`] on any violation.
pub fn validate_indexes(descriptor: &EntityDescriptor) -> Result<()> {
    let mut seen_names = HashSet::new();
    for index in descriptor.indexes {
        if !seen_names.insert(index.name) {
            return Err(Error::MalformedIndex {
                index: index.name,
                reason: "duplicate index name".to_owned(),
            });
        }
        if index.partition_fields.is_empty() {
            return Err(Error::MalformedIndex {
                index: index.name,
                reason: "an index must declare at least one partition field".to_owned(),
            });
        }
        let mut component_fields = HashSet::new();
        for field in index.partition_fields.iter().chain(index.sort_fields) {
            if descriptor.field(field).is_none() {
                return Err(Error::MalformedIndex {
                    index: index.name,
                    reason: format!("field `{field}` does not exist on this entity"),
                });
            }
            if !component_fields.insert(*field) {
                return Err(Error::MalformedIndex {
                    index: index.name,
                    reason: format!("field `{field}` appears twice in this index's key"),
                });
            }
        }
        if let Projection::IncludeOnly(fields) = index.projection {
            let key_fields: HashSet<&str> = descriptor
                .fields
                .iter()
                .filter(|f| !matches!(f.key_role, crate::field::KeyRole::None))
                .map(|f| f.name)
                .collect();
            for field in fields {
                if key_fields.contains(field) {
                    return Err(Error::MalformedIndex {
                        index: index.name,
                        reason: format!("INCLUDE_ONLY must not list key field `{field}`"),
                    });
                }
            }
        }
    }
    Ok(())
}

/// Computes the derived index attributes a row must carry for `index`,
/// per `spec.md` §3 and §4.7. Returns `None` for a sparse index when any
/// component value is undefined (`spec.md` GLOSSARY "Sparse index").
#[must_use]
pub fn derived_attributes(
    index: &IndexDef,
    descriptor: &EntityDescriptor,
    values: &BTreeMap<String, Value>,
) -> Option<BTreeMap<String, Value>> {
    if index.aliases_base_key(descriptor) {
        return Some(BTreeMap::new());
    }
    let mut out = BTreeMap::new();
    for fields in [index.partition_fields, index.sort_fields] {
        if fields.is_empty() {
            continue;
        }
        let components: Option<Vec<(&'static str, &Value)>> =
            fields.iter().map(|f| values.get(*f).map(|v| (*f, v))).collect();
        let Some(components) = components else {
            // A component value is undefined: per `spec.md` GLOSSARY
            // "Sparse index", a sparse index omits the row entirely; a
            // non-sparse index cannot materialize this attribute group at
            // all, which is itself only reachable if the field in
            // question was declared optional, so we likewise omit it.
            if index.sparse {
                return None;
            }
            continue;
        };
        let encoded = crate::key::encode(&components).ok()?;
        out.insert(IndexDef::derived_attribute(fields), Value::S(encoded));
    }
    Some(out)
}
