//! End-to-end scenarios against `MemoryStore`: create/read, contention and
//! retry (on a numeric counter and on a `List`-typed field), blind
//! increment, guestbook-style appends, and compound keys.

mod support;

use occdb::prelude::*;
use std::cell::Cell;
use std::collections::BTreeMap;
use std::rc::Rc;
use support::{env, kv, Account, Counter, GuestbookEntry, TagList};

#[tokio::test]
async fn create_then_read_round_trips_every_field() {
    let (store, schema, metrics) = env();

    run(store.clone(), schema.clone(), metrics.clone(), TransactionOptions::default(), |tx| async move {
        tx.create::<Counter>(kv(&[("counter_id", Value::string("c-1")), ("count", Value::number(0))]))?;
        Ok(())
    })
    .await
    .unwrap();

    let seen = run(store, schema, metrics, TransactionOptions::default(), |tx| async move {
        let model = tx
            .get::<Counter>(kv(&[("counter_id", Value::string("c-1"))]), false)
            .await?
            .expect("row exists");
        model.borrow_mut().count()
    })
    .await
    .unwrap();

    assert_eq!(seen, Some(0));
}

#[tokio::test]
async fn create_twice_is_rejected() {
    let (store, schema, metrics) = env();

    run(store.clone(), schema.clone(), metrics.clone(), TransactionOptions::default(), |tx| async move {
        tx.create::<Counter>(kv(&[("counter_id", Value::string("dup-1")), ("count", Value::number(0))]))?;
        Ok(())
    })
    .await
    .unwrap();

    let err = run(store, schema, metrics, TransactionOptions::default(), |tx| async move {
        tx.create::<Counter>(kv(&[("counter_id", Value::string("dup-1")), ("count", Value::number(0))]))?;
        Ok(())
    })
    .await
    .unwrap_err();

    assert!(matches!(err, Error::ModelAlreadyExists), "expected ModelAlreadyExists, got {err:?}");
}

/// Two writers race on the same counter: the first attempt loses because
/// the row moved underneath it, the retry observes the new state and
/// layers its own delta on top.
#[tokio::test]
async fn race_on_counter_retries_and_converges() {
    let (store, schema, metrics) = env();

    run(store.clone(), schema.clone(), metrics.clone(), TransactionOptions::default(), |tx| async move {
        tx.create::<Counter>(kv(&[("counter_id", Value::string("race-1")), ("count", Value::number(0))]))?;
        Ok(())
    })
    .await
    .unwrap();

    let attempts = Rc::new(Cell::new(0u32));
    let interferer = store.clone();

    run(store.clone(), schema.clone(), metrics.clone(), TransactionOptions::default(), {
        let attempts = attempts.clone();
        move |tx| {
            let attempts = attempts.clone();
            let interferer = interferer.clone();
            async move {
                let model = tx
                    .get::<Counter>(kv(&[("counter_id", Value::string("race-1"))]), false)
                    .await?
                    .expect("row exists");
                let _ = model.borrow_mut().count()?;

                if attempts.get() == 0 {
                    // A concurrent writer steals this row between our read and our commit.
                    let row_key = occdb::store::ItemKey::new(
                        occdb::key::encode(&[("counter_id", &Value::string("race-1"))]).unwrap(),
                        None,
                    );
                    interferer
                        .update(Counter::TABLE, &row_key, vec![occdb::store::UpdateOp::Increment("count".to_owned(), Value::number(100))], None)
                        .await
                        .map_err(Error::Store)?;
                }
                attempts.set(attempts.get() + 1);

                model.borrow_mut().increment_count(1)?;
                Ok(())
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(attempts.get(), 2, "first attempt should have lost to contention and retried once");

    let final_count = run(store, schema, metrics, TransactionOptions::default(), |tx| async move {
        let model = tx
            .get::<Counter>(kv(&[("counter_id", Value::string("race-1"))]), false)
            .await?
            .expect("row exists");
        model.borrow_mut().count()
    })
    .await
    .unwrap();

    assert_eq!(final_count, Some(101), "retry must apply its delta on top of the concurrent writer's value");
}

/// A blind UPDATE establishes a known baseline via `expected` without a
/// prior `get`, then layers a pure additive delta on top.
#[tokio::test]
async fn blind_increment_applies_additive_delta_without_reading() {
    let (store, schema, metrics) = env();

    run(store.clone(), schema.clone(), metrics.clone(), TransactionOptions::default(), |tx| async move {
        tx.create::<Counter>(kv(&[("counter_id", Value::string("blind-1")), ("count", Value::number(10))]))?;
        Ok(())
    })
    .await
    .unwrap();

    run(store.clone(), schema.clone(), metrics.clone(), TransactionOptions::default(), |tx| async move {
        let model = tx.update::<Counter>(
            kv(&[("counter_id", Value::string("blind-1"))]),
            kv(&[("count", Value::number(10))]),
            BTreeMap::new(),
        )?;
        model.borrow_mut().increment_count(7)?;
        Ok(())
    })
    .await
    .unwrap();

    let final_count = run(store, schema, metrics, TransactionOptions::default(), |tx| async move {
        let model = tx
            .get::<Counter>(kv(&[("counter_id", Value::string("blind-1"))]), false)
            .await?
            .expect("row exists");
        model.borrow_mut().count()
    })
    .await
    .unwrap();

    assert_eq!(final_count, Some(17));
}

#[tokio::test]
async fn guestbook_append_preserves_sort_order() {
    let (store, schema, metrics) = env();

    for (seq, message) in [(1, "first"), (2, "second"), (3, "third")] {
        run(store.clone(), schema.clone(), metrics.clone(), TransactionOptions::default(), move |tx| async move {
            tx.create::<GuestbookEntry>(kv(&[
                ("board_id", Value::string("board-1")),
                ("seq", Value::number(seq)),
                ("message", Value::string(message)),
            ]))?;
            Ok(())
        })
        .await
        .unwrap();
    }

    let messages = run(store, schema, metrics, TransactionOptions::default(), |tx| async move {
        let rows = tx.query::<GuestbookEntry>().eq("board_id", "board-1")?.run(10).await?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.borrow_mut().message()?.unwrap_or_default());
        }
        Ok(out)
    })
    .await
    .unwrap();

    assert_eq!(messages, vec!["first", "second", "third"]);
}

#[tokio::test]
async fn compound_key_identifies_a_unique_row() {
    let (store, schema, metrics) = env();

    run(store.clone(), schema.clone(), metrics.clone(), TransactionOptions::default(), |tx| async move {
        tx.create::<Account>(kv(&[
            ("tenant_id", Value::string("tenant-a")),
            ("account_no", Value::string("001")),
            ("balance", Value::number(500)),
            ("holder_name", Value::string("Ada")),
        ]))?;
        tx.create::<Account>(kv(&[
            ("tenant_id", Value::string("tenant-b")),
            ("account_no", Value::string("001")),
            ("balance", Value::number(900)),
            ("holder_name", Value::string("Grace")),
        ]))?;
        Ok(())
    })
    .await
    .unwrap();

    let (a_balance, b_balance) = run(store, schema, metrics, TransactionOptions::default(), |tx| async move {
        let a = tx
            .get::<Account>(kv(&[("tenant_id", Value::string("tenant-a")), ("account_no", Value::string("001"))]), false)
            .await?
            .expect("tenant-a row exists");
        let b = tx
            .get::<Account>(kv(&[("tenant_id", Value::string("tenant-b")), ("account_no", Value::string("001"))]), false)
            .await?
            .expect("tenant-b row exists");
        Ok((a.borrow_mut().balance()?, b.borrow_mut().balance()?))
    })
    .await
    .unwrap();

    assert_eq!(a_balance, Some(500));
    assert_eq!(b_balance, Some(900));
}

/// Two writers race to append to the same `List`-typed field: the first
/// attempt reads the empty list, loses to a concurrent writer that appends
/// first, and the retry must observe and preserve that writer's element
/// before layering its own append on top.
#[tokio::test]
async fn race_on_list_append_retries_and_preserves_first_writer() {
    let (store, schema, metrics) = env();

    run(store.clone(), schema.clone(), metrics.clone(), TransactionOptions::default(), |tx| async move {
        tx.create::<TagList>(kv(&[("list_id", Value::string("board-1")), ("names", Value::L(Vec::new()))]))?;
        Ok(())
    })
    .await
    .unwrap();

    let attempts = Rc::new(Cell::new(0u32));
    let interferer = store.clone();

    run(store.clone(), schema.clone(), metrics.clone(), TransactionOptions::default(), {
        let attempts = attempts.clone();
        move |tx| {
            let attempts = attempts.clone();
            let interferer = interferer.clone();
            async move {
                let model = tx
                    .get::<TagList>(kv(&[("list_id", Value::string("board-1"))]), false)
                    .await?
                    .expect("row exists");
                let mut names = model.borrow_mut().names()?.unwrap_or_default();

                if attempts.get() == 0 {
                    // A concurrent writer appends its own element between our
                    // read and our commit.
                    let row_key = occdb::store::ItemKey::new(
                        occdb::key::encode(&[("list_id", &Value::string("board-1"))]).unwrap(),
                        None,
                    );
                    interferer
                        .update(
                            TagList::TABLE,
                            &row_key,
                            vec![occdb::store::UpdateOp::Set(
                                "names".to_owned(),
                                Value::L(vec![Value::string("writer-one")]),
                            )],
                            None,
                        )
                        .await
                        .map_err(Error::Store)?;
                }
                attempts.set(attempts.get() + 1);

                names.push("writer-two".to_owned());
                model.borrow_mut().set_names(names)?;
                Ok(())
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(attempts.get(), 2, "first attempt should have lost to contention and retried once");

    let final_names = run(store, schema, metrics, TransactionOptions::default(), |tx| async move {
        let model = tx
            .get::<TagList>(kv(&[("list_id", Value::string("board-1"))]), false)
            .await?
            .expect("row exists");
        model.borrow_mut().names()
    })
    .await
    .unwrap();

    assert_eq!(final_names, Some(vec!["writer-one".to_owned(), "writer-two".to_owned()]));
}
