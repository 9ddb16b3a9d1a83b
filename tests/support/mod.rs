//! Shared entity declarations and fixtures for the integration suite.
//!
//! Partition/sort field names deliberately avoid `id`, `sk`, `is_new`,
//! `mutated`, `key`, and friends: those already name inherent methods on
//! `Model<E>` (see `src/item.rs`), and `entity!` generates an accessor of
//! the same name as each declared field.

use occdb::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;

entity! {
    name: Counter,
    table: "counters",
    partition: [ counter_id: String [] ],
    sort: [],
    fields: [
        count: i64 [numeric],
    ],
    indexes: [],
}

entity! {
    name: GuestbookEntry,
    table: "guestbook",
    partition: [ board_id: String [] ],
    sort: [ seq: i64 [] ],
    fields: [
        message: String [],
    ],
    indexes: [],
}

entity! {
    name: Account,
    table: "accounts",
    partition: [ tenant_id: String [] ],
    sort: [ account_no: String [] ],
    fields: [
        balance: i64 [numeric],
        holder_name: String [],
    ],
    indexes: [],
}

entity! {
    name: Order,
    table: "orders",
    partition: [ customer_id: String [] ],
    sort: [ order_seq: i64 [] ],
    fields: [
        status: String [],
        total_cents: i64 [numeric],
    ],
    indexes: [],
}

/// Carries a secondary index whose key doesn't alias the base table's own
/// partition key, so a create must materialize a `_c_*` derived attribute.
entity! {
    name: Ticket,
    table: "tickets",
    partition: [ ticket_id: String [] ],
    sort: [],
    fields: [
        assignee: String [],
        priority: i64 [numeric],
    ],
    indexes: [
        occdb::model::IndexDef {
            name: "assignee-index",
            partition_fields: &["assignee"],
            sort_fields: &[],
            projection: occdb::model::Projection::All,
            sparse: false,
        },
    ],
}

/// Exercises a field default, applied only when the item is new and the
/// caller omits the field.
entity! {
    name: Task,
    table: "tasks",
    partition: [ task_id: String [] ],
    sort: [],
    fields: [
        status: String [] = "pending".to_owned(),
    ],
    indexes: [],
}

/// A single `List`-typed field, for exercising concurrent append-style
/// mutation under contention.
entity! {
    name: TagList,
    table: "tag_lists",
    partition: [ list_id: String [] ],
    sort: [],
    fields: [
        names: Vec<String> [],
    ],
    indexes: [],
}

/// Builds a `key_values`/`values` map from `(name, value)` pairs.
#[must_use]
pub fn kv(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
    pairs.iter().cloned().map(|(k, v)| (k.to_owned(), v)).collect()
}

/// A fresh in-memory environment: empty store, permissive schema, tracing metrics.
#[must_use]
pub fn env() -> (Arc<MemoryStore>, Arc<NoopSchema>, Arc<TracingSink>) {
    (Arc::new(MemoryStore::new()), Arc::new(NoopSchema), Arc::new(TracingSink))
}
