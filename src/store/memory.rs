//! In-memory fake implementing [`Store`], used by this crate's own test
//! suite and exported for downstream crates that want to unit test their
//! entities without talking to AWS (`spec.md` §6 "debug-only exports").
//!
//! It reproduces DynamoDB's observable semantics closely enough to drive
//! every scenario in `spec.md` §8: conditional puts/updates, transactional
//! multi-item writes with per-item cancellation reasons, query/scan with
//! `ExclusiveStartKey`-style pagination, and TTL-based expiry.

use super::{
    Condition, ItemKey, Page, QueryParams, ScanParams, Store, StoreError, StoreErrorCode,
    StoreItem, TableDescription, TableSpec, UpdateOp, WriteOp,
};
use crate::value::Value;
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::Mutex;

/// Key used internally to order rows lexicographically the way DynamoDB
/// orders a partition's sort-key range.
type RowKey = (String, Option<String>);

#[derive(Default)]
struct Table {
    rows: BTreeMap<RowKey, StoreItem>,
}

/// In-memory [`Store`]. Cheap to construct; one instance is one table.
pub struct MemoryStore {
    tables: Mutex<BTreeMap<String, Table>>,
    /// Epoch-seconds clock injected by tests to exercise TTL deterministically.
    now: Box<dyn Fn() -> i64 + Send + Sync>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(BTreeMap::new()),
            now: Box::new(|| chrono::Utc::now().timestamp()),
        }
    }

    /// Construct a store with a fixed clock, for deterministic TTL tests.
    #[must_use]
    pub fn with_clock(now: impl Fn() -> i64 + Send + Sync + 'static) -> Self {
        Self {
            tables: Mutex::new(BTreeMap::new()),
            now: Box::new(now),
        }
    }

    fn row_key(key: &ItemKey) -> RowKey {
        (key.partition.clone(), key.sort.clone())
    }

    fn item_key_of(item: &StoreItem) -> Option<ItemKey> {
        let partition = item.get("_id")?.as_str()?.to_owned();
        let sort = item.get("_sk").and_then(Value::as_str).map(str::to_owned);
        Some(ItemKey::new(partition, sort))
    }

    fn eval_condition(item: Option<&StoreItem>, condition: &Condition) -> bool {
        match condition {
            Condition::AttributeExists(attr) => item.is_some_and(|i| i.contains_key(attr)),
            Condition::AttributeNotExists(attr) => item.is_none_or(|i| !i.contains_key(attr)),
            Condition::Equals(attr, value) => {
                item.and_then(|i| i.get(attr)).is_some_and(|v| v == value)
            }
            Condition::LessThan(attr, value) => item
                .and_then(|i| i.get(attr))
                .and_then(|v| v.compare(value))
                .is_some_and(std::cmp::Ordering::is_lt),
            Condition::LessThanOrEqual(attr, value) => item
                .and_then(|i| i.get(attr))
                .and_then(|v| v.compare(value))
                .is_some_and(std::cmp::Ordering::is_le),
            Condition::GreaterThan(attr, value) => item
                .and_then(|i| i.get(attr))
                .and_then(|v| v.compare(value))
                .is_some_and(std::cmp::Ordering::is_gt),
            Condition::GreaterThanOrEqual(attr, value) => item
                .and_then(|i| i.get(attr))
                .and_then(|v| v.compare(value))
                .is_some_and(std::cmp::Ordering::is_ge),
            Condition::Between(attr, lo, hi) => item.and_then(|i| i.get(attr)).is_some_and(|v| {
                v.compare(lo).is_some_and(std::cmp::Ordering::is_ge) && v.compare(hi).is_some_and(std::cmp::Ordering::is_le)
            }),
            Condition::BeginsWith(attr, prefix) => item.and_then(|i| i.get(attr)).is_some_and(|v| v.starts_with(prefix)),
            Condition::And(parts) => parts.iter().all(|c| Self::eval_condition(item, c)),
            Condition::Or(parts) => parts.iter().any(|c| Self::eval_condition(item, c)),
        }
    }

    fn apply_ops(item: &mut StoreItem, ops: &[UpdateOp]) {
        for op in ops {
            match op {
                UpdateOp::Set(attr, value) => {
                    item.insert(attr.clone(), value.clone());
                }
                UpdateOp::Increment(attr, delta) => {
                    let current = item.get(attr).and_then(Value::as_decimal).unwrap_or_default();
                    let delta = delta.as_decimal().unwrap_or_default();
                    item.insert(attr.clone(), Value::N(current + delta));
                }
                UpdateOp::Remove(attr) => {
                    item.remove(attr);
                }
            }
        }
    }

    /// A conditional check failure, tagged against `code`.
    fn condition_failed() -> StoreError {
        StoreError::new(
            StoreErrorCode::ConditionalCheckFailed,
            "conditional request failed",
        )
    }

    fn is_expired(&self, item: &StoreItem, ttl_attribute: Option<&str>) -> bool {
        let Some(attr) = ttl_attribute else {
            return false;
        };
        let Some(epoch) = item.get(attr).and_then(Value::as_decimal) else {
            return false;
        };
        let Some(epoch) = epoch.to_string().parse::<i64>().ok() else {
            return false;
        };
        epoch <= (self.now)()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(
        &self,
        table: &str,
        key: &ItemKey,
        _strong: bool,
    ) -> Result<Option<StoreItem>, StoreError> {
        let tables = self.tables.lock().await;
        let item = tables
            .get(table)
            .and_then(|t| t.rows.get(&Self::row_key(key)))
            .cloned();
        Ok(item)
    }

    async fn put(
        &self,
        table: &str,
        item: StoreItem,
        condition: Option<Condition>,
    ) -> Result<(), StoreError> {
        let key = Self::item_key_of(&item).ok_or_else(|| {
            StoreError::new(StoreErrorCode::ValidationError, "item missing _id")
        })?;
        let mut tables = self.tables.lock().await;
        let rows = &mut tables.entry(table.to_owned()).or_default().rows;
        let existing = rows.get(&Self::row_key(&key));
        if let Some(cond) = &condition {
            if !Self::eval_condition(existing, cond) {
                return Err(Self::condition_failed());
            }
        }
        rows.insert(Self::row_key(&key), item);
        Ok(())
    }

    async fn update(
        &self,
        table: &str,
        key: &ItemKey,
        ops: Vec<UpdateOp>,
        condition: Option<Condition>,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        let rows = &mut tables.entry(table.to_owned()).or_default().rows;
        let row_key = Self::row_key(key);
        let existing = rows.get(&row_key).cloned();
        if let Some(cond) = &condition {
            if !Self::eval_condition(existing.as_ref(), cond) {
                return Err(Self::condition_failed());
            }
        }
        let mut item = existing.unwrap_or_default();
        item.insert("_id".to_owned(), Value::string(key.partition.clone()));
        if let Some(sort) = &key.sort {
            item.insert("_sk".to_owned(), Value::string(sort.clone()));
        }
        Self::apply_ops(&mut item, &ops);
        rows.insert(row_key, item);
        Ok(())
    }

    async fn delete(
        &self,
        table: &str,
        key: &ItemKey,
        condition: Option<Condition>,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        let rows = &mut tables.entry(table.to_owned()).or_default().rows;
        let row_key = Self::row_key(key);
        let existing = rows.get(&row_key);
        if let Some(cond) = &condition {
            if !Self::eval_condition(existing, cond) {
                return Err(Self::condition_failed());
            }
        }
        rows.remove(&row_key);
        Ok(())
    }

    async fn batch_get(
        &self,
        table: &str,
        keys: &[ItemKey],
        _strong: bool,
    ) -> Result<Vec<StoreItem>, StoreError> {
        let tables = self.tables.lock().await;
        let rows = tables.get(table);
        Ok(keys
            .iter()
            .filter_map(|k| rows.and_then(|t| t.rows.get(&Self::row_key(k))).cloned())
            .collect())
    }

    async fn transact_get(
        &self,
        table: &str,
        keys: &[ItemKey],
    ) -> Result<Vec<Option<StoreItem>>, StoreError> {
        let tables = self.tables.lock().await;
        let rows = tables.get(table);
        Ok(keys
            .iter()
            .map(|k| rows.and_then(|t| t.rows.get(&Self::row_key(k))).cloned())
            .collect())
    }

    async fn transact_write(&self, table: &str, ops: Vec<WriteOp>) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        let rows = &tables.entry(table.to_owned()).or_default().rows;

        // Evaluate every condition against the pre-write snapshot first;
        // DynamoDB's TransactWriteItems is all-or-nothing.
        let mut reasons = vec![false; ops.len()];
        let mut any_failed = false;
        for (idx, op) in ops.iter().enumerate() {
            let (key, condition) = match op {
                WriteOp::Put { key, condition, .. } => (key, condition.as_ref()),
                WriteOp::Update { key, condition, .. } => (key, condition.as_ref()),
                WriteOp::Delete { key, condition } => (key, condition.as_ref()),
                WriteOp::ConditionCheck { key, condition } => (key, Some(condition)),
            };
            if let Some(cond) = condition {
                let existing = rows.get(&Self::row_key(key));
                if !Self::eval_condition(existing, cond) {
                    reasons[idx] = true;
                    any_failed = true;
                }
            }
        }
        if any_failed {
            return Err(StoreError::new(
                StoreErrorCode::TransactionCanceled,
                "one or more conditions failed",
            )
            .with_cancellation_reasons(reasons));
        }

        let rows = &mut tables.get_mut(table).expect("inserted above").rows;
        for op in ops {
            match op {
                WriteOp::Put { key, item, .. } => {
                    rows.insert(Self::row_key(&key), item);
                }
                WriteOp::Update { key, ops, .. } => {
                    let row_key = Self::row_key(&key);
                    let mut item = rows.get(&row_key).cloned().unwrap_or_default();
                    item.insert("_id".to_owned(), Value::string(key.partition.clone()));
                    if let Some(sort) = &key.sort {
                        item.insert("_sk".to_owned(), Value::string(sort.clone()));
                    }
                    Self::apply_ops(&mut item, &ops);
                    rows.insert(row_key, item);
                }
                WriteOp::Delete { key, .. } => {
                    rows.remove(&Self::row_key(&key));
                }
                WriteOp::ConditionCheck { .. } => {}
            }
        }
        Ok(())
    }

    async fn query(&self, table: &str, params: QueryParams) -> Result<Page, StoreError> {
        let tables = self.tables.lock().await;
        let mut items: Vec<StoreItem> = tables
            .get(table)
            .map(|t| t.rows.values().cloned().collect())
            .unwrap_or_default();
        if let Some(cond) = &params.condition {
            items.retain(|item| Self::eval_condition(Some(item), cond));
        }
        if !params.scan_forward {
            items.reverse();
        }
        paginate(items, params.limit, params.exclusive_start_key.as_ref())
    }

    async fn scan(&self, table: &str, params: ScanParams) -> Result<Page, StoreError> {
        let tables = self.tables.lock().await;
        let mut items: Vec<StoreItem> = tables
            .get(table)
            .map(|t| t.rows.values().cloned().collect())
            .unwrap_or_default();
        if let Some(cond) = &params.condition {
            items.retain(|item| Self::eval_condition(Some(item), cond));
        }
        if let (Some(segment), Some(total)) = (params.segment, params.total_segments) {
            items = items
                .into_iter()
                .enumerate()
                .filter(|(i, _)| (*i as u32) % total == segment)
                .map(|(_, item)| item)
                .collect();
        }
        paginate(items, params.limit, params.exclusive_start_key.as_ref())
    }

    async fn describe_table(&self, table: &str) -> Result<TableDescription, StoreError> {
        let tables = self.tables.lock().await;
        let count = tables.get(table).map(|t| t.rows.len() as i64);
        Ok(TableDescription {
            name: table.to_owned(),
            item_count: count,
            status: Some("ACTIVE".to_owned()),
        })
    }

    async fn create_table(&self, spec: TableSpec) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        tables.entry(spec.name).or_default();
        Ok(())
    }

    async fn update_table(&self, _spec: TableSpec) -> Result<(), StoreError> {
        Ok(())
    }
}

fn paginate(
    items: Vec<StoreItem>,
    limit: Option<u32>,
    exclusive_start_key: Option<&StoreItem>,
) -> Result<Page, StoreError> {
    let start = exclusive_start_key
        .and_then(MemoryStore::item_key_of)
        .map(|k| (k.partition, k.sort));
    let mut remaining: Vec<StoreItem> = match start {
        Some(start) => {
            let position = items.iter().position(|item| {
                MemoryStore::item_key_of(item).map(|k| (k.partition, k.sort)) == Some(start.clone())
            });
            match position {
                Some(idx) => items.into_iter().skip(idx + 1).collect(),
                None => Vec::new(),
            }
        }
        None => items,
    };
    let limit = limit.unwrap_or(u32::MAX) as usize;
    let last_evaluated_key = if remaining.len() > limit {
        remaining.truncate(limit);
        remaining.last().and_then(|item| {
            let mut k = BTreeMap::new();
            if let Some(id) = item.get("_id") {
                k.insert("_id".to_owned(), id.clone());
            }
            if let Some(sk) = item.get("_sk") {
                k.insert("_sk".to_owned(), sk.clone());
            }
            Some(k)
        })
    } else {
        None
    };
    Ok(Page {
        items: remaining,
        last_evaluated_key,
    })
}
