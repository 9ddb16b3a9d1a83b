//! Query/Scan builders (`spec.md` §4.5), grounded on the teacher's
//! builder-returns-`self` shape
//! (`icydb-core/src/db/query/builder/query.rs`'s `QueryBuilder`), adapted
//! from a schema-validated predicate tree to the flat per-field filter list
//! `spec.md` describes.

pub mod query;
pub mod scan;

pub use query::Query;
pub use scan::Scan;

use crate::error::{Error, Result};
use crate::field::KeyRole;
use crate::model::EntityDescriptor;
use crate::store::Condition;
use crate::value::Value;
use std::collections::HashSet;

/// `spec.md` §4.5: "per declared key field a method f(op, value[, value2])".
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FilterOp {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
    Between,
    Prefix,
}

#[derive(Clone, Debug)]
struct AppliedFilter {
    field: &'static str,
    op: FilterOp,
    value: Value,
    value2: Option<Value>,
}

impl AppliedFilter {
    fn into_condition(self) -> Condition {
        match self.op {
            FilterOp::Eq => Condition::Equals(self.field.to_owned(), self.value),
            FilterOp::Lt => Condition::LessThan(self.field.to_owned(), self.value),
            FilterOp::Le => Condition::LessThanOrEqual(self.field.to_owned(), self.value),
            FilterOp::Gt => Condition::GreaterThan(self.field.to_owned(), self.value),
            FilterOp::Ge => Condition::GreaterThanOrEqual(self.field.to_owned(), self.value),
            FilterOp::Between => Condition::Between(
                self.field.to_owned(),
                self.value,
                self.value2.expect("FilterOp::Between always carries a second value"),
            ),
            FilterOp::Prefix => Condition::BeginsWith(self.field.to_owned(), self.value),
        }
    }
}

/// Shared filter-accumulation state for `Query`/`Scan`.
///
/// `requires_lazy_flag_for_non_key` is `true` for `Query` (`spec.md` §4.5
/// "on non-key fields only when allowLazyFilter is set (Query only; Scan
/// never requires it)") and `false` for `Scan`.
pub(crate) struct FilterSet {
    requires_lazy_flag_for_non_key: bool,
    filters: Vec<AppliedFilter>,
    seen: HashSet<&'static str>,
    index_name: Option<&'static str>,
    inconsistent_read: bool,
    allow_lazy_filter: bool,
    locked: bool,
}

impl FilterSet {
    pub(crate) fn new(requires_lazy_flag_for_non_key: bool) -> Self {
        Self {
            requires_lazy_flag_for_non_key,
            filters: Vec::new(),
            seen: HashSet::new(),
            index_name: None,
            inconsistent_read: false,
            allow_lazy_filter: false,
            locked: false,
        }
    }

    fn check_unlocked(&self) -> Result<()> {
        if self.locked {
            return Err(Error::Locked);
        }
        Ok(())
    }

    pub(crate) fn push(&mut self, descriptor: &'static EntityDescriptor, field: &'static str, op: FilterOp, value: Value, value2: Option<Value>) -> Result<()> {
        self.check_unlocked()?;
        if !self.seen.insert(field) {
            return Err(Error::DuplicateFilter(field));
        }
        let Some(fd) = descriptor.field(field) else {
            return Err(Error::InvalidParameter(format!("field `{field}` is not declared on `{}`", descriptor.name)));
        };
        match fd.key_role {
            KeyRole::Partition => {
                if op != FilterOp::Eq {
                    return Err(Error::InvalidParameter(format!(
                        "partition field `{field}` only supports equality filters"
                    )));
                }
            }
            KeyRole::Sort => {}
            KeyRole::None => {
                if self.requires_lazy_flag_for_non_key && !self.allow_lazy_filter {
                    return Err(Error::InvalidParameter(format!(
                        "filtering non-key field `{field}` requires allow_lazy_filter()"
                    )));
                }
            }
        }
        self.filters.push(AppliedFilter { field, op, value, value2 });
        Ok(())
    }

    pub(crate) fn set_allow_lazy_filter(&mut self) -> Result<()> {
        self.check_unlocked()?;
        self.allow_lazy_filter = true;
        Ok(())
    }

    /// `spec.md` §4.5 "Strong consistency is not available on secondary
    /// indexes (passing inconsistentRead=false with an index is a usage
    /// error)".
    pub(crate) fn set_index(&mut self, name: &'static str, inconsistent_read: bool) -> Result<()> {
        self.check_unlocked()?;
        if !inconsistent_read {
            return Err(Error::InconsistentReadRequiredOnIndex(name));
        }
        self.index_name = Some(name);
        self.inconsistent_read = inconsistent_read;
        Ok(())
    }

    pub(crate) const fn index_name(&self) -> Option<&'static str> {
        self.index_name
    }

    pub(crate) const fn is_strongly_consistent(&self) -> bool {
        self.index_name.is_none() && !self.inconsistent_read
    }

    /// Locks the filter set (`setupParams()` in `spec.md`'s terms); further
    /// mutation fails with [`Error::Locked`]. `None` means no filter was
    /// ever applied.
    pub(crate) fn lock(&mut self) -> Option<Condition> {
        self.locked = true;
        Condition::and(self.filters.iter().cloned().map(AppliedFilter::into_condition).collect())
    }
}

fn now_epoch_secs() -> i64 {
    chrono::Utc::now().timestamp()
}
