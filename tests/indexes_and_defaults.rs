//! Secondary-index derived attributes on the ordinary (UPDATE-sourced)
//! create path, and field defaults applied only to brand-new items.

mod support;

use occdb::prelude::*;
use occdb::store::ItemKey;
use support::{env, kv, Task, Ticket};

/// A fresh entity with mutated non-key fields routes through
/// `update_descriptor`, not `put_descriptor` (`batch.rs::plan()`); that
/// path must still materialize `_c_*` derived attributes for every
/// declared index.
#[tokio::test]
async fn create_populates_derived_index_attribute_on_the_update_path() {
    let (store, schema, metrics) = env();

    run(store.clone(), schema.clone(), metrics.clone(), TransactionOptions::default(), |tx| async move {
        tx.create::<Ticket>(kv(&[
            ("ticket_id", Value::string("t-1")),
            ("assignee", Value::string("ada")),
            ("priority", Value::number(1)),
        ]))?;
        Ok(())
    })
    .await
    .unwrap();

    let raw = store
        .get(Ticket::TABLE, &ItemKey::new("t-1".to_owned(), None), true)
        .await
        .unwrap()
        .expect("row exists");

    assert_eq!(raw.get("_c_assignee"), Some(&Value::string("ada")));
}

#[tokio::test]
async fn create_omitting_a_defaulted_field_applies_the_default() {
    let (store, schema, metrics) = env();

    run(store.clone(), schema.clone(), metrics.clone(), TransactionOptions::default(), |tx| async move {
        tx.create::<Task>(kv(&[("task_id", Value::string("task-1"))]))?;
        Ok(())
    })
    .await
    .unwrap();

    let status = run(store.clone(), schema.clone(), metrics.clone(), TransactionOptions::default(), |tx| async move {
        let model = tx
            .get::<Task>(kv(&[("task_id", Value::string("task-1"))]), false)
            .await?
            .expect("row exists");
        model.borrow_mut().status()
    })
    .await
    .unwrap();

    assert_eq!(status, Some("pending".to_owned()));

    let raw = store
        .get(Task::TABLE, &ItemKey::new("task-1".to_owned(), None), true)
        .await
        .unwrap()
        .expect("row exists");
    assert_eq!(raw.get("status"), Some(&Value::string("pending")));
}

#[tokio::test]
async fn create_supplying_a_defaulted_field_keeps_the_caller_s_value() {
    let (store, schema, metrics) = env();

    run(store, schema, metrics, TransactionOptions::default(), |tx| async move {
        let model = tx.create::<Task>(kv(&[
            ("task_id", Value::string("task-2")),
            ("status", Value::string("in-progress")),
        ]))?;
        assert_eq!(model.borrow_mut().status()?, Some("in-progress".to_owned()));
        Ok(())
    })
    .await
    .unwrap();
}
