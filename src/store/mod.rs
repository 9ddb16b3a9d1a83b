//! The external store contract (`spec.md` §6).
//!
//! Everything in this module is a pure data/trait description of what the
//! core consumes from a remote document store; no backend logic lives here.
//! `dynamo` and `memory` are the two concrete implementations.

pub mod dynamo;
mod error;
pub mod memory;

pub use error::{StoreError, StoreErrorCode};

use crate::value::Value;
use async_trait::async_trait;
use std::collections::BTreeMap;

/// An item as exchanged with the store: a flat attribute-name → `Value` map.
pub type StoreItem = BTreeMap<String, Value>;

///
/// ItemKey
///
/// A store-native primary key: a required partition key attribute (`_id`)
/// and an optional sort key attribute (`_sk`), per `spec.md` §1.
///

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct ItemKey {
    pub partition: String,
    pub sort: Option<String>,
}

impl ItemKey {
    #[must_use]
    pub const fn new(partition: String, sort: Option<String>) -> Self {
        Self { partition, sort }
    }
}

///
/// Condition
///
/// A store-agnostic conditional-expression AST. The core builds these from
/// field state (`crate::field::Field::condition_expression`); backends
/// lower them to their native expression syntax (e.g. DynamoDB's
/// `ConditionExpression` + `ExpressionAttributeValues`).
///

#[derive(Clone, Debug, PartialEq)]
pub enum Condition {
    AttributeExists(String),
    AttributeNotExists(String),
    Equals(String, Value),
    /// Sort-key/query comparison operators (`spec.md` §4.5: `<, <=, >, >=,
    /// between, prefix`). Not used by field-level write conditions, which
    /// only ever need `Equals`/`AttributeExists`/`AttributeNotExists`.
    LessThan(String, Value),
    LessThanOrEqual(String, Value),
    GreaterThan(String, Value),
    GreaterThanOrEqual(String, Value),
    Between(String, Value, Value),
    BeginsWith(String, Value),
    And(Vec<Condition>),
    Or(Vec<Condition>),
}

impl Condition {
    #[must_use]
    pub fn and(conditions: Vec<Self>) -> Option<Self> {
        match conditions.len() {
            0 => None,
            1 => conditions.into_iter().next(),
            _ => Some(Self::And(conditions)),
        }
    }
}

///
/// UpdateOp
///
/// A single attribute mutation within an `update`/`Update` write, per
/// `spec.md` §4.1 `updateExpression`.
///

#[derive(Clone, Debug, PartialEq)]
pub enum UpdateOp {
    Set(String, Value),
    /// `SET f = f + amount`, emitted only when `Field::incrementBy` can be
    /// applied unconditionally (`spec.md` §4.1).
    Increment(String, Value),
    Remove(String),
}

///
/// WriteOp
///
/// One operation within a `transact_write` batch, or the sole operation of
/// the single-item fast path (`spec.md` §4.4).
///

#[derive(Clone, Debug, PartialEq)]
pub enum WriteOp {
    Put {
        key: ItemKey,
        item: StoreItem,
        condition: Option<Condition>,
    },
    Update {
        key: ItemKey,
        ops: Vec<UpdateOp>,
        condition: Option<Condition>,
    },
    Delete {
        key: ItemKey,
        condition: Option<Condition>,
    },
    ConditionCheck {
        key: ItemKey,
        condition: Condition,
    },
}

///
/// QueryParams
///

#[derive(Clone, Debug, Default)]
pub struct QueryParams {
    pub index_name: Option<String>,
    pub consistent_read: bool,
    pub scan_forward: bool,
    pub limit: Option<u32>,
    pub exclusive_start_key: Option<StoreItem>,
    pub condition: Option<Condition>,
}

///
/// ScanParams
///

#[derive(Clone, Debug, Default)]
pub struct ScanParams {
    pub index_name: Option<String>,
    pub consistent_read: bool,
    pub limit: Option<u32>,
    pub exclusive_start_key: Option<StoreItem>,
    pub condition: Option<Condition>,
    pub segment: Option<u32>,
    pub total_segments: Option<u32>,
}

///
/// Page
///
/// One page of results from `query`/`scan`, with the store-native
/// continuation key (opaque to the core; re-sent verbatim as
/// `exclusive_start_key` on the next call).
///

#[derive(Clone, Debug, Default)]
pub struct Page {
    pub items: Vec<StoreItem>,
    pub last_evaluated_key: Option<StoreItem>,
}

///
/// TableSpec / TableDescription
///
/// Out-of-scope provisioning plumbing (`spec.md` §1 "autoscaling/table
/// provisioning control plane"); kept as opaque pass-through types so the
/// `Store` contract is complete per `spec.md` §6 without the core
/// interpreting table schemas itself.
///

#[derive(Clone, Debug, Default)]
pub struct TableSpec {
    pub name: String,
    pub attributes: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default)]
pub struct TableDescription {
    pub name: String,
    pub item_count: Option<i64>,
    pub status: Option<String>,
}

///
/// Store
///
/// The remote document store contract consumed by the core (`spec.md` §6).
/// Method names match the capability list verbatim. Implementations must be
/// `Send + Sync`: the core assumes the store client is shared process-wide
/// (`spec.md` §5).
///

#[async_trait]
pub trait Store: Send + Sync {
    async fn get(
        &self,
        table: &str,
        key: &ItemKey,
        strong: bool,
    ) -> Result<Option<StoreItem>, StoreError>;

    async fn put(
        &self,
        table: &str,
        item: StoreItem,
        condition: Option<Condition>,
    ) -> Result<(), StoreError>;

    async fn update(
        &self,
        table: &str,
        key: &ItemKey,
        ops: Vec<UpdateOp>,
        condition: Option<Condition>,
    ) -> Result<(), StoreError>;

    async fn delete(
        &self,
        table: &str,
        key: &ItemKey,
        condition: Option<Condition>,
    ) -> Result<(), StoreError>;

    /// Eventually- or strongly-consistent batch get. Returns the subset of
    /// `keys` that were found; any keys DynamoDB reports as
    /// `UnprocessedKeys` must already have been retried internally by the
    /// implementation within its own backoff budget, so the core sees
    /// either a complete result or an error (`spec.md` §4.6 "hard cap 11
    /// attempts").
    async fn batch_get(
        &self,
        table: &str,
        keys: &[ItemKey],
        strong: bool,
    ) -> Result<Vec<StoreItem>, StoreError>;

    /// Strongly-consistent transactional multi-get (`spec.md` §4.6
    /// "transactional multi-get"). Returns one slot per input key, `None`
    /// when that key does not exist, preserving input order.
    async fn transact_get(
        &self,
        table: &str,
        keys: &[ItemKey],
    ) -> Result<Vec<Option<StoreItem>>, StoreError>;

    /// Transactional multi-item write. On a conditional failure, the error
    /// must report the failing index(es) via
    /// [`StoreError`] so the batcher can decode it back to the originating
    /// items (`spec.md` §4.4).
    async fn transact_write(&self, table: &str, ops: Vec<WriteOp>) -> Result<(), StoreError>;

    async fn query(&self, table: &str, params: QueryParams) -> Result<Page, StoreError>;

    async fn scan(&self, table: &str, params: ScanParams) -> Result<Page, StoreError>;

    async fn describe_table(&self, table: &str) -> Result<TableDescription, StoreError>;

    async fn create_table(&self, spec: TableSpec) -> Result<(), StoreError>;

    async fn update_table(&self, spec: TableSpec) -> Result<(), StoreError>;
}
