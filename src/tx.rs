//! Transactions (`spec.md` §4.6, §4.7): the unit of work a caller's closure
//! runs inside, plus the free `run()` retry loop that drives it.
//!
//! A `Transaction` is deliberately `!Send`/`!Sync` (its model cache and
//! batcher are `Rc`/`RefCell`): one transaction belongs to one task for its
//! whole lifetime, matching `spec.md` §5 "single-threaded per transaction".

use crate::batch::WriteBatcher;
use crate::error::{Error, Result};
use crate::item::{self, Model};
use crate::model::{Entity, EntityDescriptor};
use crate::obs::MetricsSink;
use crate::query::{Query, Scan};
use crate::schema::SchemaAdapter;
use crate::store::{ItemKey, Store, StoreItem};
use crate::value::Value;
use std::any::Any;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

/// `(table, partition, sort)` — the cache/tracking key for one row,
/// independent of its entity type.
type RowKey = (&'static str, String, Option<String>);

fn row_key_of<E: Entity>(model: &Rc<RefCell<Model<E>>>) -> RowKey {
    let borrowed = model.borrow();
    (E::TABLE, borrowed.id().to_owned(), borrowed.sk().map(str::to_owned))
}

fn build_item_key(descriptor: &'static EntityDescriptor, key_values: &BTreeMap<String, Value>) -> Result<ItemKey> {
    let partition_values: Vec<(&'static str, &Value)> = descriptor
        .partition_fields()
        .into_iter()
        .map(|fd| {
            key_values
                .get(fd.name)
                .map(|v| (fd.name, v))
                .ok_or_else(|| Error::InvalidParameter(format!("missing partition field `{}`", fd.name)))
        })
        .collect::<Result<_>>()?;
    let partition = crate::key::encode(&partition_values)?;

    let sort_fields = descriptor.sort_fields();
    let sort = if sort_fields.is_empty() {
        None
    } else {
        let sort_values: Vec<(&'static str, &Value)> = sort_fields
            .into_iter()
            .map(|fd| {
                key_values
                    .get(fd.name)
                    .map(|v| (fd.name, v))
                    .ok_or_else(|| Error::InvalidParameter(format!("missing sort field `{}`", fd.name)))
            })
            .collect::<Result<_>>()?;
        Some(crate::key::encode(&sort_values)?)
    };
    Ok(ItemKey::new(partition, sort))
}

fn now_epoch_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

///
/// TransactionOptions
///
/// Policy knobs for one `run()` call (`spec.md` §4.6 "retries,
/// initialBackoff, maxBackoff, readOnly, cacheModels").
///

#[derive(Clone, Debug)]
pub struct TransactionOptions {
    pub retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub read_only: bool,
    pub cache_models: bool,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            retries: 3,
            initial_backoff: Duration::from_millis(40),
            max_backoff: Duration::from_millis(1_000),
            read_only: false,
            cache_models: true,
        }
    }
}

impl TransactionOptions {
    /// # Errors
    /// [`Error::InvalidOption`] if `initial_backoff` is under 1ms or
    /// `max_backoff` is under 200ms (`spec.md` §4.6).
    pub fn validate(&self) -> Result<()> {
        if self.initial_backoff < Duration::from_millis(1) {
            return Err(Error::InvalidOption("initial_backoff must be at least 1ms".to_owned()));
        }
        if self.max_backoff < Duration::from_millis(200) {
            return Err(Error::InvalidOption("max_backoff must be at least 200ms".to_owned()));
        }
        Ok(())
    }
}

///
/// CommitOutcome
///
/// Passed to every registered post-commit event handler, win or lose
/// (`spec.md` §4.7 "event handlers fire on both success and failure").
///

#[derive(Clone, Debug)]
pub enum CommitOutcome {
    Success,
    Failure(String),
}

type EventHandler = Box<dyn FnMut(&CommitOutcome) -> Result<()>>;

///
/// Transaction
///
/// The handle a `run()` closure receives. Reads dispatch straight to the
/// store; writes accumulate in a [`WriteBatcher`] and only reach the store
/// at commit. Not `Send`/`Sync`: everything here is `Rc`/`RefCell`, so a
/// `Transaction` never crosses a task boundary (`spec.md` §5).
///
pub struct Transaction {
    store: Arc<dyn Store>,
    schema: Arc<dyn SchemaAdapter>,
    metrics: Arc<dyn MetricsSink>,
    batcher: RefCell<WriteBatcher>,
    cache: RefCell<HashMap<RowKey, Rc<dyn Any>>>,
    cache_enabled: bool,
    read_only: RefCell<bool>,
    event_handlers: RefCell<Vec<EventHandler>>,
}

impl Transaction {
    pub(crate) fn new(store: Arc<dyn Store>, schema: Arc<dyn SchemaAdapter>, metrics: Arc<dyn MetricsSink>, opts: &TransactionOptions) -> Self {
        Self {
            store,
            schema,
            metrics,
            batcher: RefCell::new(WriteBatcher::new()),
            cache: RefCell::new(HashMap::new()),
            cache_enabled: opts.cache_models,
            read_only: RefCell::new(opts.read_only),
            event_handlers: RefCell::new(Vec::new()),
        }
    }

    fn check_writable(&self) -> Result<()> {
        if *self.read_only.borrow() {
            return Err(Error::ReadOnlyTransaction);
        }
        Ok(())
    }

    /// Disables further writes for the remainder of this transaction
    /// (`spec.md` §4.6 "makeReadOnly"). Irreversible.
    pub fn make_read_only(&self) {
        *self.read_only.borrow_mut() = true;
    }

    /// Registers a handler that runs once per commit attempt's outcome, in
    /// registration order. A handler's own error propagates out of
    /// `run()`, replacing a successful commit's result (`spec.md` §4.7).
    pub fn add_event_handler(&self, handler: impl FnMut(&CommitOutcome) -> Result<()> + 'static) {
        self.event_handlers.borrow_mut().push(Box::new(handler));
    }

    fn cache_lookup<E: Entity>(&self, row_key: &RowKey) -> Option<Rc<RefCell<Model<E>>>> {
        if !self.cache_enabled {
            return None;
        }
        let erased = self.cache.borrow().get(row_key).cloned()?;
        erased.downcast::<RefCell<Model<E>>>().ok()
    }

    /// Tracks `model` in the batcher and, if caching is enabled, replaces
    /// any prior cache entry at the same row key — invalidating the old
    /// handle so a caller still holding it sees [`Error::StaleCachedModel`]
    /// on next access (`spec.md` §4.6 "re-fetching the same key returns the
    /// same handle").
    fn register<E: Entity>(&self, model: &Rc<RefCell<Model<E>>>) -> Result<()> {
        let row_key = row_key_of(model);
        self.batcher.borrow_mut().track(model)?;
        if self.cache_enabled {
            if let Some(old) = self.cache.borrow_mut().insert(row_key, model.clone()) {
                if let Ok(old) = old.downcast::<RefCell<Model<E>>>() {
                    if !Rc::ptr_eq(&old, model) {
                        old.borrow_mut().invalidate();
                    }
                }
            }
        }
        Ok(())
    }

    /// GET (`spec.md` §4.6). `create_if_missing` returns a new, tracked,
    /// `is_new` shell instead of `None` when the row doesn't exist.
    ///
    /// # Errors
    /// Propagates the store error, a key-encoding error from `key_values`,
    /// or [`Error::ReadOnlyTransaction`] when `create_if_missing` is set on
    /// a read-only transaction.
    pub async fn get<E: Entity>(&self, key_values: BTreeMap<String, Value>, create_if_missing: bool) -> Result<Option<Rc<RefCell<Model<E>>>>> {
        let descriptor = E::descriptor();
        let key = build_item_key(descriptor, &key_values)?;
        let row_key: RowKey = (E::TABLE, key.partition.clone(), key.sort.clone());
        if let Some(cached) = self.cache_lookup::<E>(&row_key) {
            return Ok(Some(cached));
        }

        let raw = self.store.get(E::TABLE, &key, true).await.map_err(Error::Store)?;
        match raw {
            Some(raw) if !item::is_expired(descriptor, &raw, now_epoch_secs()) => {
                let model = Rc::new(RefCell::new(Model::from_store_item(descriptor, self.schema.clone(), raw)?));
                self.register(&model)?;
                Ok(Some(model))
            }
            _ if create_if_missing => {
                self.check_writable()?;
                let model = Rc::new(RefCell::new(Model::empty_shell(descriptor, self.schema.clone(), key_values)?));
                self.register(&model)?;
                Ok(Some(model))
            }
            _ => Ok(None),
        }
    }

    /// Batched GET over several keys of the same entity (`spec.md` §4.6
    /// "getMany"). Strongly consistent unless `inconsistent_read` is set,
    /// in which case the store's `batch_get` is used instead of
    /// `transact_get` (`spec.md` §4.6 "a list of keys with
    /// inconsistentRead=true routes to batch_get; otherwise
    /// transact_get"). Missing rows are omitted, preserving the order of
    /// the keys that were found.
    ///
    /// # Errors
    /// Propagates the store error or a key-encoding error.
    pub async fn get_many<E: Entity>(&self, keys: &[BTreeMap<String, Value>], inconsistent_read: bool) -> Result<Vec<Rc<RefCell<Model<E>>>>> {
        let descriptor = E::descriptor();
        let mut item_keys = Vec::with_capacity(keys.len());
        for key_values in keys {
            item_keys.push(build_item_key(descriptor, key_values)?);
        }

        let mut out = Vec::with_capacity(item_keys.len());
        if inconsistent_read {
            let rows = self.store.batch_get(E::TABLE, &item_keys, false).await.map_err(Error::Store)?;
            for raw in rows {
                if item::is_expired(descriptor, &raw, now_epoch_secs()) {
                    continue;
                }
                let row_key_from_id = raw.get("_id").and_then(Value::as_str).map(str::to_owned);
                if let Some(id) = row_key_from_id {
                    let sk = raw.get("_sk").and_then(Value::as_str).map(str::to_owned);
                    let row_key: RowKey = (E::TABLE, id, sk);
                    if let Some(cached) = self.cache_lookup::<E>(&row_key) {
                        out.push(cached);
                        continue;
                    }
                }
                let model = Rc::new(RefCell::new(Model::from_store_item(descriptor, self.schema.clone(), raw)?));
                self.register(&model)?;
                out.push(model);
            }
        } else {
            let rows = self.store.transact_get(E::TABLE, &item_keys).await.map_err(Error::Store)?;
            for (key, raw) in item_keys.iter().zip(rows) {
                let Some(raw) = raw else { continue };
                if item::is_expired(descriptor, &raw, now_epoch_secs()) {
                    continue;
                }
                let row_key: RowKey = (E::TABLE, key.partition.clone(), key.sort.clone());
                if let Some(cached) = self.cache_lookup::<E>(&row_key) {
                    out.push(cached);
                    continue;
                }
                let model = Rc::new(RefCell::new(Model::from_store_item(descriptor, self.schema.clone(), raw)?));
                self.register(&model)?;
                out.push(model);
            }
        }
        Ok(out)
    }

    /// CREATE (`spec.md` §4.6).
    ///
    /// # Errors
    /// [`Error::ReadOnlyTransaction`], a schema validation error, or a
    /// key-encoding error.
    pub fn create<E: Entity>(&self, values: BTreeMap<String, Value>) -> Result<Rc<RefCell<Model<E>>>> {
        self.check_writable()?;
        let model = Rc::new(RefCell::new(Model::create(E::descriptor(), self.schema.clone(), values)?));
        self.register(&model)?;
        Ok(model)
    }

    /// CREATE_OR_PUT / upsert (`spec.md` §4.6).
    ///
    /// # Errors
    /// See [`Self::create`].
    pub fn create_or_put<E: Entity>(&self, expected: BTreeMap<String, Value>, final_values: BTreeMap<String, Value>) -> Result<Rc<RefCell<Model<E>>>> {
        self.check_writable()?;
        let model = Rc::new(RefCell::new(Model::create_or_put(E::descriptor(), self.schema.clone(), expected, final_values)?));
        self.register(&model)?;
        Ok(model)
    }

    /// Blind UPDATE: no prior `get` (`spec.md` §4.6).
    ///
    /// # Errors
    /// See [`Self::create`].
    pub fn update<E: Entity>(
        &self,
        key_values: BTreeMap<String, Value>,
        expected: BTreeMap<String, Value>,
        changes: BTreeMap<String, Value>,
    ) -> Result<Rc<RefCell<Model<E>>>> {
        self.check_writable()?;
        let descriptor = E::descriptor();
        let key = build_item_key(descriptor, &key_values)?;
        let model = Rc::new(RefCell::new(Model::update_blind(descriptor, self.schema.clone(), key, expected, changes)?));
        self.register(&model)?;
        Ok(model)
    }

    /// Marks an already-tracked model for deletion at commit (`spec.md`
    /// §4.6).
    ///
    /// # Errors
    /// [`Error::ReadOnlyTransaction`].
    pub fn delete<E: Entity>(&self, model: &Rc<RefCell<Model<E>>>) -> Result<()> {
        self.check_writable()?;
        model.borrow_mut().mark_for_delete();
        Ok(())
    }

    /// Deletes by key without a prior `get` (`spec.md` §4.6
    /// "deleteByKey").
    ///
    /// # Errors
    /// See [`Self::create`].
    pub fn delete_by_key<E: Entity>(&self, key_values: BTreeMap<String, Value>) -> Result<Rc<RefCell<Model<E>>>> {
        self.check_writable()?;
        let model = Rc::new(RefCell::new(Model::empty_shell(E::descriptor(), self.schema.clone(), key_values)?));
        model.borrow_mut().mark_for_delete();
        self.register(&model)?;
        Ok(model)
    }

    /// Materializes one query/scan result row: returns the existing cached
    /// handle if this row is already tracked (e.g. read earlier via `get`),
    /// otherwise builds and tracks a fresh `Model`.
    fn track_query_row<E: Entity>(&self, raw: StoreItem) -> Result<Rc<RefCell<Model<E>>>> {
        let descriptor = E::descriptor();
        if self.cache_enabled {
            if let Some(id) = raw.get("_id").and_then(Value::as_str) {
                let sk = raw.get("_sk").and_then(Value::as_str).map(str::to_owned);
                let row_key: RowKey = (E::TABLE, id.to_owned(), sk);
                if let Some(cached) = self.cache_lookup::<E>(&row_key) {
                    return Ok(cached);
                }
            }
        }
        let model = Rc::new(RefCell::new(Model::from_store_item(descriptor, self.schema.clone(), raw)?));
        self.register(&model)?;
        Ok(model)
    }

    /// Opens a single-partition query (`spec.md` §4.5). Every materialized
    /// row is tracked the same as a `get`.
    pub fn query<E: Entity>(&self) -> Query<'_, E> {
        Query::new(self.store.clone(), Box::new(move |raw| self.track_query_row(raw)))
    }

    /// Opens a whole-table scan (`spec.md` §4.5).
    pub fn scan<E: Entity>(&self) -> Scan<'_, E> {
        Scan::new(self.store.clone(), Box::new(move |raw| self.track_query_row(raw)))
    }

    /// Commits every tracked write (`spec.md` §4.4), then fires every
    /// registered event handler in order regardless of outcome.
    async fn commit(&self) -> Result<()> {
        let batcher = self.batcher.borrow();
        let result = if batcher.is_empty() {
            Ok(())
        } else {
            batcher.commit(self.store.as_ref(), self.metrics.as_ref()).await
        };
        drop(batcher);

        let outcome = match &result {
            Ok(()) => CommitOutcome::Success,
            Err(e) => CommitOutcome::Failure(e.to_string()),
        };
        for handler in self.event_handlers.borrow_mut().iter_mut() {
            handler(&outcome)?;
        }
        result
    }
}

/// Runs `body` inside a fresh [`Transaction`], retrying on contention per
/// `opts` (`spec.md` §4.6 "run(options, closure)").
///
/// On each attempt a brand-new `Transaction` is built (a prior attempt's
/// reads/writes never bleed into the next): `spec.md` §8 "Race on counter"
/// depends on the retried attempt re-reading current state rather than
/// replaying stale values.
///
/// # Errors
/// [`Error::InvalidOption`] if `opts` fails [`TransactionOptions::validate`];
/// the closure's own error if non-retryable; [`Error::TransactionFailed`]
/// once retries are exhausted on a retryable error.
pub async fn run<F, Fut, T>(store: Arc<dyn Store>, schema: Arc<dyn SchemaAdapter>, metrics: Arc<dyn MetricsSink>, opts: TransactionOptions, mut body: F) -> Result<T>
where
    F: FnMut(Rc<Transaction>) -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    opts.validate()?;
    let mut attempt: u32 = 0;
    loop {
        let tx = Rc::new(Transaction::new(store.clone(), schema.clone(), metrics.clone(), &opts));
        let outcome = match body(tx.clone()).await {
            Ok(value) => tx.commit().await.map(|()| value),
            Err(e) => Err(e),
        };
        match outcome {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < opts.retries => {
                attempt += 1;
                let delay = crate::backoff::jittered(opts.initial_backoff, opts.max_backoff, attempt - 1);
                metrics.commit_retry("transaction", attempt, delay);
                tokio::time::sleep(delay).await;
            }
            Err(e) if e.is_retryable() => {
                return Err(Error::TransactionFailed(format!(
                    "exhausted {} retries; last error: {e}",
                    opts.retries
                )));
            }
            Err(e) => return Err(e),
        }
    }
}
