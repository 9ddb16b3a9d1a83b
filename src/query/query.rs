//! `Query<E>`: the strongly-consistent-by-default iterator over a single
//! partition (`spec.md` §4.5).

use super::{now_epoch_secs, FilterOp, FilterSet};
use crate::error::{Error, Result};
use crate::item::{self, Model};
use crate::model::{Entity, EntityDescriptor};
use crate::store::{Condition, QueryParams, Store, StoreItem};
use crate::value::Value;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

/// A fluent, single-partition query builder. Constructed by
/// [`crate::tx::Transaction::query`]; every `filter`-family method consumes
/// and returns `Self` so calls chain with `?` (`spec.md` §4.5 "fluent
/// builder"). Row materialization is delegated to `track`, so a row already
/// tracked in the owning transaction (e.g. read earlier via `get`) comes
/// back as that same handle rather than a fresh, untracked duplicate.
pub struct Query<'tx, E: Entity> {
    store: Arc<dyn Store>,
    descriptor: &'static EntityDescriptor,
    filters: FilterSet,
    scan_forward: bool,
    cached_condition: Option<Option<Condition>>,
    track: Box<dyn FnMut(StoreItem) -> Result<Rc<RefCell<Model<E>>>> + 'tx>,
}

impl<'tx, E: Entity> Query<'tx, E> {
    pub(crate) fn new(store: Arc<dyn Store>, track: Box<dyn FnMut(StoreItem) -> Result<Rc<RefCell<Model<E>>>> + 'tx>) -> Self {
        Self {
            store,
            descriptor: E::descriptor(),
            filters: FilterSet::new(true),
            scan_forward: true,
            cached_condition: None,
            track,
        }
    }

    fn filter(mut self, field: &'static str, op: FilterOp, value: Value, value2: Option<Value>) -> Result<Self> {
        self.filters.push(self.descriptor, field, op, value, value2)?;
        Ok(self)
    }

    /// Equality filter. The only operator permitted on a partition-key field.
    pub fn eq(self, field: &'static str, value: impl Into<Value>) -> Result<Self> {
        self.filter(field, FilterOp::Eq, value.into(), None)
    }

    pub fn lt(self, field: &'static str, value: impl Into<Value>) -> Result<Self> {
        self.filter(field, FilterOp::Lt, value.into(), None)
    }

    pub fn le(self, field: &'static str, value: impl Into<Value>) -> Result<Self> {
        self.filter(field, FilterOp::Le, value.into(), None)
    }

    pub fn gt(self, field: &'static str, value: impl Into<Value>) -> Result<Self> {
        self.filter(field, FilterOp::Gt, value.into(), None)
    }

    pub fn ge(self, field: &'static str, value: impl Into<Value>) -> Result<Self> {
        self.filter(field, FilterOp::Ge, value.into(), None)
    }

    pub fn between(self, field: &'static str, lo: impl Into<Value>, hi: impl Into<Value>) -> Result<Self> {
        self.filter(field, FilterOp::Between, lo.into(), Some(hi.into()))
    }

    pub fn prefix(self, field: &'static str, value: impl Into<Value>) -> Result<Self> {
        self.filter(field, FilterOp::Prefix, value.into(), None)
    }

    /// Permits a filter on a non-key field. Required before filtering any
    /// field that isn't part of the partition or sort key (`spec.md` §4.5).
    pub fn allow_lazy_filter(mut self) -> Result<Self> {
        self.filters.set_allow_lazy_filter()?;
        Ok(self)
    }

    /// Routes the query to a named secondary index. `inconsistent_read`
    /// must be `true`: indexes never support strongly consistent reads.
    pub fn index(mut self, name: &'static str, inconsistent_read: bool) -> Result<Self> {
        self.filters.set_index(name, inconsistent_read)?;
        Ok(self)
    }

    #[must_use]
    pub fn scan_forward(mut self, forward: bool) -> Self {
        self.scan_forward = forward;
        self
    }

    fn locked_condition(&mut self) -> Option<Condition> {
        if self.cached_condition.is_none() {
            self.cached_condition = Some(self.filters.lock());
        }
        self.cached_condition.clone().flatten()
    }

    fn build_params(&mut self, limit: u32, token: Option<StoreItem>) -> QueryParams {
        let consistent_read = self.filters.is_strongly_consistent();
        let index_name = self.filters.index_name().map(str::to_owned);
        let scan_forward = self.scan_forward;
        let condition = self.locked_condition();
        QueryParams {
            index_name,
            consistent_read,
            scan_forward,
            limit: Some(limit),
            exclusive_start_key: token,
            condition,
        }
    }

    /// One page of results (`spec.md` §4.5 "fetch(limit[, token])").
    ///
    /// # Errors
    /// Propagates the underlying store error, or a validation error if a
    /// materialized row's `_id`/`_sk` fail to decode.
    pub async fn next_page(&mut self, limit: u32, token: Option<StoreItem>) -> Result<(Vec<Rc<RefCell<Model<E>>>>, Option<StoreItem>)> {
        let params = self.build_params(limit, token);
        let page = self.store.query(E::TABLE, params).await.map_err(Error::Store)?;
        let mut items = Vec::with_capacity(page.items.len());
        for raw in page.items {
            if item::is_expired(self.descriptor, &raw, now_epoch_secs()) {
                continue;
            }
            items.push((self.track)(raw)?);
        }
        Ok((items, page.last_evaluated_key))
    }

    /// Alias for [`Self::next_page`] (`spec.md` §4.5 naming).
    ///
    /// # Errors
    /// See [`Self::next_page`].
    pub async fn fetch(&mut self, limit: u32, token: Option<StoreItem>) -> Result<(Vec<Rc<RefCell<Model<E>>>>, Option<StoreItem>)> {
        self.next_page(limit, token).await
    }

    /// Lazily materializes up to `limit` items across as many pages as
    /// needed, consuming the builder (`spec.md` §4.5 "restartable only by
    /// constructing a new iterator").
    ///
    /// # Errors
    /// See [`Self::next_page`].
    pub async fn run(mut self, limit: u32) -> Result<Vec<Rc<RefCell<Model<E>>>>> {
        let mut out = Vec::new();
        let mut token = None;
        while (out.len() as u32) < limit {
            let remaining = limit - out.len() as u32;
            let (items, next) = self.next_page(remaining, token.take()).await?;
            let got = items.len();
            out.extend(items);
            if got == 0 || next.is_none() {
                break;
            }
            token = next;
        }
        Ok(out)
    }
}
