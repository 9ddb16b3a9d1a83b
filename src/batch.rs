//! The write batcher (`spec.md` §3 "Batcher state", §4.4).
//!
//! Tracks every `Model` read or created within one transaction, decides
//! per item at commit time whether it needs a `Put`, `Update`, `Delete`,
//! or `ConditionCheck`, and reduces the whole set to either a single-item
//! store call or one transactional bundle.

use crate::error::{Error, Result};
use crate::item::{ItemSource, Model};
use crate::model::Entity;
use crate::obs::MetricsSink;
use crate::store::{Store, StoreError, StoreErrorCode, WriteOp};
use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;
use std::time::Duration;

/// Type-erased view of a tracked `Model<E>`, so the batcher can hold
/// models of different entity types in one transaction without being
/// generic over `E` itself.
pub(crate) trait Tracked {
    fn table(&self) -> &'static str;
    fn row_key(&self) -> (&'static str, String, Option<String>);
    fn source(&self) -> ItemSource;
    fn is_new(&self) -> bool;
    fn mutated(&self) -> bool;
    fn accessed_any(&self) -> bool;
    fn is_marked_for_delete(&self) -> bool;
    fn put_descriptor(&self) -> WriteOp;
    fn update_descriptor(&self) -> Option<WriteOp>;
    fn delete_descriptor(&self) -> WriteOp;
    fn condition_check(&self) -> Option<WriteOp>;
    fn invalidate(&self);
}

impl<E: Entity> Tracked for RefCell<Model<E>> {
    fn table(&self) -> &'static str {
        E::TABLE
    }

    fn row_key(&self) -> (&'static str, String, Option<String>) {
        let model = self.borrow();
        (E::TABLE, model.id().to_owned(), model.sk().map(str::to_owned))
    }

    fn source(&self) -> ItemSource {
        self.borrow().source()
    }

    fn is_new(&self) -> bool {
        self.borrow().is_new()
    }

    fn mutated(&self) -> bool {
        self.borrow().mutated()
    }

    fn accessed_any(&self) -> bool {
        self.borrow().accessed_any()
    }

    fn is_marked_for_delete(&self) -> bool {
        self.borrow().is_marked_for_delete()
    }

    fn put_descriptor(&self) -> WriteOp {
        self.borrow().put_descriptor()
    }

    fn update_descriptor(&self) -> Option<WriteOp> {
        self.borrow().update_descriptor()
    }

    fn delete_descriptor(&self) -> WriteOp {
        self.borrow().delete_descriptor()
    }

    fn condition_check(&self) -> Option<WriteOp> {
        self.borrow().condition_check()
    }

    fn invalidate(&self) {
        self.borrow_mut().invalidate();
    }
}

type TrackedHandle = Rc<dyn Tracked>;

/// One planned operation: the tracked model it came from (so commit
/// errors can be decoded back to it, and so it can be invalidated on a
/// successful write) plus the op itself, or `None` if this model
/// contributes nothing this commit.
struct Planned {
    item: TrackedHandle,
    op: Option<WriteOp>,
}

pub(crate) struct WriteBatcher {
    tracked: Vec<TrackedHandle>,
    keys: HashSet<(&'static str, String, Option<String>)>,
}

impl WriteBatcher {
    pub(crate) fn new() -> Self {
        Self {
            tracked: Vec::new(),
            keys: HashSet::new(),
        }
    }

    /// `track(item)` (`spec.md` §4.4).
    ///
    /// # Errors
    /// [`Error::DuplicateTracking`] if the same `(table, _id, _sk)` is
    /// already tracked in this transaction.
    pub(crate) fn track<E: Entity>(&mut self, model: &Rc<RefCell<Model<E>>>) -> Result<()> {
        let handle: TrackedHandle = model.clone();
        let key = handle.row_key();
        if !self.keys.insert(key.clone()) {
            return Err(Error::DuplicateTracking(format!(
                "{}/{}{}",
                key.0,
                key.1,
                key.2.map(|s| format!("/{s}")).unwrap_or_default()
            )));
        }
        self.tracked.push(handle);
        Ok(())
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.tracked.is_empty()
    }

    fn plan(&self) -> Vec<Planned> {
        self.tracked
            .iter()
            .map(|item| {
                let op = if item.is_marked_for_delete() {
                    Some(item.delete_descriptor())
                } else {
                    match item.source() {
                        ItemSource::CreateOrPut => Some(item.put_descriptor()),
                        ItemSource::Update => item.update_descriptor(),
                        ItemSource::Create | ItemSource::Get => {
                            if item.is_new() {
                                if item.mutated() {
                                    item.update_descriptor()
                                } else {
                                    Some(item.put_descriptor())
                                }
                            } else if item.mutated() {
                                item.update_descriptor()
                            } else if item.accessed_any() {
                                item.condition_check()
                            } else {
                                None
                            }
                        }
                    }
                };
                Planned {
                    item: item.clone(),
                    op,
                }
            })
            .collect()
    }

    /// Reduces tracked models to a single store call when possible
    /// (`spec.md` §4.4 "Single-item fast path"), otherwise assembles a
    /// transactional bundle (`spec.md` §4.4 "Multi-item commit"). Each
    /// tracked item names its own table; a transactional bundle still
    /// issues one `transact_write` call, so mixed-table transactions are
    /// only sound under the single-table design `spec.md` §4.3 endorses
    /// ("distinct entities may share a table").
    pub(crate) async fn commit(&self, store: &dyn Store, metrics: &dyn MetricsSink) -> Result<()> {
        let planned: Vec<Planned> = self
            .plan()
            .into_iter()
            .filter(|p| p.op.is_some())
            .collect();
        if planned.is_empty() {
            return Ok(());
        }

        if planned.len() == 1 {
            let table = planned[0].item.table();
            self.commit_single(store, table, &planned[0], metrics).await?;
        } else {
            let table = planned[0].item.table();
            self.commit_transactional(store, table, &planned, metrics).await?;
        }
        for planned in &planned {
            planned.item.invalidate();
        }
        Ok(())
    }

    /// `spec.md` §4.4: "exponential backoff with ±10% jitter, base 40ms,
    /// up to 3 attempts".
    const FAST_PATH_BASE: Duration = Duration::from_millis(40);
    const FAST_PATH_MAX_ATTEMPTS: u32 = 3;

    async fn commit_single(&self, store: &dyn Store, table: &str, planned: &Planned, metrics: &dyn MetricsSink) -> Result<()> {
        let op = planned.op.clone().expect("checked Some by caller");
        let source = planned.item.source();
        let mut attempt: u32 = 0;
        loop {
            metrics.commit_attempt(table, 1);
            let result = execute_op(store, table, op.clone()).await;
            match result {
                Ok(()) => {
                    metrics.commit_succeeded(table, attempt + 1);
                    return Ok(());
                }
                Err(store_err) => {
                    let decoded = decode_store_error(source, store_err);
                    attempt += 1;
                    if !decoded.is_retryable() || attempt >= Self::FAST_PATH_MAX_ATTEMPTS {
                        metrics.commit_failed(table, attempt);
                        return Err(decoded);
                    }
                    let delay = crate::backoff::jittered(
                        Self::FAST_PATH_BASE,
                        Self::FAST_PATH_BASE.mul_f64(2f64.powi(Self::FAST_PATH_MAX_ATTEMPTS as i32)),
                        attempt - 1,
                    );
                    metrics.commit_retry(table, attempt, delay);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn commit_transactional(&self, store: &dyn Store, table: &str, planned: &[Planned], metrics: &dyn MetricsSink) -> Result<()> {
        let ops: Vec<WriteOp> = planned.iter().map(|p| p.op.clone().expect("checked Some by caller")).collect();
        metrics.commit_attempt(table, ops.len());
        match store.transact_write(table, ops).await {
            Ok(()) => {
                metrics.commit_succeeded(table, 1);
                Ok(())
            }
            Err(store_err) => {
                metrics.commit_failed(table, 1);
                Err(decode_transact_error(planned, store_err))
            }
        }
    }
}

async fn execute_op(store: &dyn Store, table: &str, op: WriteOp) -> std::result::Result<(), StoreError> {
    match op {
        WriteOp::Put { item, condition, .. } => store.put(table, item, condition).await,
        WriteOp::Update { key, ops, condition } => store.update(table, &key, ops, condition).await,
        WriteOp::Delete { key, condition } => store.delete(table, &key, condition).await,
        WriteOp::ConditionCheck { key, condition } => {
            // No backend primitive for a bare single-item condition check;
            // a zero-op conditional update enforces the same guard.
            store.update(table, &key, Vec::new(), Some(condition)).await
        }
    }
}

/// Maps a store-signalled conditional-check failure to the concurrency
/// error appropriate for the item's source (`spec.md` §4.4 "Multi-item
/// commit"); any other store error passes through as [`Error::Store`].
fn decode_store_error(source: ItemSource, store_err: StoreError) -> Error {
    match store_err.code {
        StoreErrorCode::ConditionalCheckFailed | StoreErrorCode::TransactionCanceled => match source {
            ItemSource::Create => Error::ModelAlreadyExists,
            ItemSource::Update => Error::InvalidModelUpdate,
            ItemSource::CreateOrPut | ItemSource::Get => Error::Contention,
        },
        _ => Error::Store(store_err),
    }
}

fn decode_transact_error(planned: &[Planned], store_err: StoreError) -> Error {
    let Some(reasons) = &store_err.cancellation_reasons else {
        return Error::Store(store_err);
    };
    let decoded: Vec<Error> = reasons
        .iter()
        .zip(planned)
        .filter(|(failed, _)| **failed)
        .map(|(_, planned)| {
            decode_store_error(
                planned.item.source(),
                StoreError::new(StoreErrorCode::ConditionalCheckFailed, "condition failed in transactional commit"),
            )
        })
        .collect();

    match decoded.len() {
        0 => Error::Store(store_err),
        1 => decoded.into_iter().next().expect("len checked"),
        _ => {
            let non_retryable: Vec<String> = decoded
                .iter()
                .filter(|e| !e.is_retryable())
                .map(ToString::to_string)
                .collect();
            if non_retryable.is_empty() {
                Error::Contention
            } else {
                Error::MultipleNonRetryableErrors(non_retryable.join("; "))
            }
        }
    }
}
