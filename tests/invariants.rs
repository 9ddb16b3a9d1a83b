//! Invariants that don't map directly onto a single user-facing scenario:
//! model-cache identity, staleness after a replacing write, read-only
//! rejection, and duplicate-tracking detection.

mod support;

use occdb::prelude::*;
use std::collections::BTreeMap;
use std::rc::Rc;
use support::{env, kv, Counter, GuestbookEntry};

/// A row already tracked via `get` comes back as the *same* handle from a
/// later `query`, rather than a fresh, untracked duplicate.
#[tokio::test]
async fn query_returns_the_same_handle_as_a_prior_get() {
    let (store, schema, metrics) = env();

    run(store.clone(), schema.clone(), metrics.clone(), TransactionOptions::default(), |tx| async move {
        tx.create::<GuestbookEntry>(kv(&[
            ("board_id", Value::string("identity-board")),
            ("seq", Value::number(1)),
            ("message", Value::string("hello")),
        ]))?;
        Ok(())
    })
    .await
    .unwrap();

    let same = run(store, schema, metrics, TransactionOptions::default(), |tx| async move {
        let via_get = tx
            .get::<GuestbookEntry>(kv(&[("board_id", Value::string("identity-board")), ("seq", Value::number(1))]), false)
            .await?
            .expect("row exists");
        let via_query = tx.query::<GuestbookEntry>().eq("board_id", "identity-board")?.run(10).await?;
        let matched = via_query.into_iter().any(|row| Rc::ptr_eq(&row, &via_get));
        Ok(matched)
    })
    .await
    .unwrap();

    assert!(same, "query should have returned the identical Rc tracked by get");
}

/// Replacing a tracked row's cache entry invalidates the handle a caller
/// is still holding.
#[tokio::test]
async fn stale_handle_errors_after_a_replacing_write() {
    let (store, schema, metrics) = env();

    run(store.clone(), schema.clone(), metrics.clone(), TransactionOptions::default(), |tx| async move {
        tx.create::<GuestbookEntry>(kv(&[
            ("board_id", Value::string("stale-board")),
            ("seq", Value::number(1)),
            ("message", Value::string("hello")),
        ]))?;
        Ok(())
    })
    .await
    .unwrap();

    let err = run(store, schema, metrics, TransactionOptions::default(), |tx| async move {
        let stale = tx
            .get::<GuestbookEntry>(kv(&[("board_id", Value::string("stale-board")), ("seq", Value::number(1))]), false)
            .await?
            .expect("row exists");

        tx.update::<GuestbookEntry>(
            kv(&[("board_id", Value::string("stale-board")), ("seq", Value::number(1))]),
            BTreeMap::new(),
            kv(&[("message", Value::string("edited"))]),
        )?;

        // `stale` was displaced from the cache by the update above; it must
        // no longer be usable.
        stale.borrow_mut().message()?;
        Ok(())
    })
    .await
    .unwrap_err();

    assert!(matches!(err, Error::StaleCachedModel), "expected StaleCachedModel, got {err:?}");
}

#[tokio::test]
async fn read_only_transaction_rejects_writes() {
    let (store, schema, metrics) = env();

    let err = run(store, schema, metrics, TransactionOptions::default(), |tx| async move {
        tx.make_read_only();
        tx.create::<Counter>(kv(&[("counter_id", Value::string("ro-1")), ("count", Value::number(0))]))?;
        Ok(())
    })
    .await
    .unwrap_err();

    assert!(matches!(err, Error::ReadOnlyTransaction), "expected ReadOnlyTransaction, got {err:?}");
}

#[tokio::test]
async fn tracking_the_same_key_twice_in_one_transaction_is_rejected() {
    let (store, schema, metrics) = env();

    let err = run(store, schema, metrics, TransactionOptions::default(), |tx| async move {
        tx.create::<Counter>(kv(&[("counter_id", Value::string("dup-track-1")), ("count", Value::number(0))]))?;
        tx.create::<Counter>(kv(&[("counter_id", Value::string("dup-track-1")), ("count", Value::number(1))]))?;
        Ok(())
    })
    .await
    .unwrap_err();

    assert!(matches!(err, Error::DuplicateTracking(_)), "expected DuplicateTracking, got {err:?}");
}
