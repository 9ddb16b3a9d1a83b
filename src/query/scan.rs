//! `Scan<E>`: the whole-table iterator (`spec.md` §4.5), including
//! parallel-scan sharding.

use super::{now_epoch_secs, FilterOp, FilterSet};
use crate::error::{Error, Result};
use crate::item::{self, Model};
use crate::model::{Entity, EntityDescriptor};
use crate::store::{Condition, ScanParams, Store, StoreItem};
use crate::value::Value;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

/// A fluent, whole-table scan builder. Unlike [`super::Query`], non-key
/// field filters never require `allow_lazy_filter` (`spec.md` §4.5 "Scan
/// never requires it"). Row materialization is delegated to `track`, so a
/// row already tracked in the owning transaction comes back as that same
/// handle rather than a fresh, untracked duplicate.
pub struct Scan<'tx, E: Entity> {
    store: Arc<dyn Store>,
    descriptor: &'static EntityDescriptor,
    filters: FilterSet,
    segment: Option<u32>,
    total_segments: Option<u32>,
    cached_condition: Option<Option<Condition>>,
    track: Box<dyn FnMut(StoreItem) -> Result<Rc<RefCell<Model<E>>>> + 'tx>,
}

impl<'tx, E: Entity> Scan<'tx, E> {
    pub(crate) fn new(store: Arc<dyn Store>, track: Box<dyn FnMut(StoreItem) -> Result<Rc<RefCell<Model<E>>>> + 'tx>) -> Self {
        Self {
            store,
            descriptor: E::descriptor(),
            filters: FilterSet::new(false),
            segment: None,
            total_segments: None,
            cached_condition: None,
            track,
        }
    }

    fn filter(mut self, field: &'static str, op: FilterOp, value: Value, value2: Option<Value>) -> Result<Self> {
        self.filters.push(self.descriptor, field, op, value, value2)?;
        Ok(self)
    }

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

    /// Routes the scan to a named secondary index. `inconsistent_read` must
    /// be `true`.
    pub fn index(mut self, name: &'static str, inconsistent_read: bool) -> Result<Self> {
        self.filters.set_index(name, inconsistent_read)?;
        Ok(self)
    }

    /// Parallel-scan sharding (`spec.md` §4.5 "shardCount must be >=1;
    /// shardIndex in [0,shardCount)").
    ///
    /// # Errors
    /// [`Error::InvalidParameter`] on an out-of-range shard index or a
    /// zero shard count.
    pub fn shard(mut self, shard_index: u32, shard_count: u32) -> Result<Self> {
        if shard_count == 0 {
            return Err(Error::InvalidParameter("shard_count must be >= 1".to_owned()));
        }
        if shard_index >= shard_count {
            return Err(Error::InvalidParameter(format!(
                "shard_index {shard_index} out of range for shard_count {shard_count}"
            )));
        }
        self.segment = Some(shard_index);
        self.total_segments = Some(shard_count);
        Ok(self)
    }

    fn locked_condition(&mut self) -> Option<Condition> {
        if self.cached_condition.is_none() {
            self.cached_condition = Some(self.filters.lock());
        }
        self.cached_condition.clone().flatten()
    }

    fn build_params(&mut self, limit: u32, token: Option<StoreItem>) -> ScanParams {
        let consistent_read = self.filters.is_strongly_consistent();
        let index_name = self.filters.index_name().map(str::to_owned);
        let condition = self.locked_condition();
        ScanParams {
            index_name,
            consistent_read,
            limit: Some(limit),
            exclusive_start_key: token,
            condition,
            segment: self.segment,
            total_segments: self.total_segments,
        }
    }

    /// # Errors
    /// See [`super::Query::next_page`].
    pub async fn next_page(&mut self, limit: u32, token: Option<StoreItem>) -> Result<(Vec<Rc<RefCell<Model<E>>>>, Option<StoreItem>)> {
        let params = self.build_params(limit, token);
        let page = self.store.scan(E::TABLE, params).await.map_err(Error::Store)?;
        let mut items = Vec::with_capacity(page.items.len());
        for raw in page.items {
            if item::is_expired(self.descriptor, &raw, now_epoch_secs()) {
                continue;
            }
            items.push((self.track)(raw)?);
        }
        Ok((items, page.last_evaluated_key))
    }

    /// # Errors
    /// See [`super::Query::next_page`].
    pub async fn fetch(&mut self, limit: u32, token: Option<StoreItem>) -> Result<(Vec<Rc<RefCell<Model<E>>>>, Option<StoreItem>)> {
        self.next_page(limit, token).await
    }

    /// # Errors
    /// See [`super::Query::run`].
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
