//! occdb: a transactional object-mapping and optimistic-concurrency-control
//! layer over a DynamoDB-like remote key-value document store.
//!
//! The public surface is a single [`Transaction`](tx::Transaction) handed
//! to a caller's closure by [`tx::run`]: every read/write inside that
//! closure is tracked, and the closure's return commits (or the whole
//! attempt retries) per the rules in each module's docs. Start with
//! [`prelude`] for the common import set, or [`entity!`] to declare a
//! mapped type.

pub mod backoff;
pub mod batch;
pub mod config;
pub mod entity;
pub mod error;
pub mod field;
pub mod item;
pub mod key;
pub mod model;
pub mod obs;
pub mod query;
pub mod schema;
pub mod store;
pub mod tx;
pub mod value;

/// Common imports for a consumer of this crate.
pub mod prelude {
    pub use crate::config::ClientConfig;
    pub use crate::entity;
    pub use crate::error::{Error, Result};
    pub use crate::field::{Field, FieldType, KeyRole};
    pub use crate::item::Model;
    pub use crate::model::{Entity, EntityDescriptor};
    pub use crate::obs::{MetricsSink, TracingSink};
    pub use crate::query::{Query, Scan};
    pub use crate::schema::{NoopSchema, SchemaAdapter};
    pub use crate::store::dynamo::DynamoStore;
    pub use crate::store::memory::MemoryStore;
    pub use crate::store::Store;
    pub use crate::tx::{run, CommitOutcome, Transaction, TransactionOptions};
    pub use crate::value::Value;
}
