//! `Query`/`Scan` fluent-builder semantics and page-by-page pagination.

mod support;

use occdb::prelude::*;
use support::{env, kv, Order};

const TOTAL_ORDERS: i64 = 25;

async fn seed_orders(store: &std::sync::Arc<MemoryStore>, schema: &std::sync::Arc<NoopSchema>, metrics: &std::sync::Arc<TracingSink>) {
    run(store.clone(), schema.clone(), metrics.clone(), TransactionOptions::default(), |tx| async move {
        for seq in 0..TOTAL_ORDERS {
            tx.create::<Order>(kv(&[
                ("customer_id", Value::string("cust-1")),
                ("order_seq", Value::number(seq)),
                ("status", Value::string("placed")),
                ("total_cents", Value::number(100)),
            ]))?;
        }
        Ok(())
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn query_paginates_across_multiple_pages_until_exhausted() {
    let (store, schema, metrics) = env();
    seed_orders(&store, &schema, &metrics).await;

    let (pages, total) = run(store, schema, metrics, TransactionOptions::default(), |tx| async move {
        let mut query = tx.query::<Order>().eq("customer_id", "cust-1")?;
        let mut token = None;
        let mut pages = 0u32;
        let mut total = 0u32;
        loop {
            let (items, next) = query.next_page(10, token.take()).await?;
            if items.is_empty() {
                break;
            }
            pages += 1;
            total += items.len() as u32;
            if next.is_none() {
                break;
            }
            token = next;
        }
        Ok((pages, total))
    })
    .await
    .unwrap();

    assert_eq!(total, TOTAL_ORDERS as u32);
    assert_eq!(pages, 3, "25 items at 10 per page should take 3 pages");
}

#[tokio::test]
async fn query_run_collects_ascending_sort_order() {
    let (store, schema, metrics) = env();
    seed_orders(&store, &schema, &metrics).await;

    let seqs = run(store, schema, metrics, TransactionOptions::default(), |tx| async move {
        let rows = tx.query::<Order>().eq("customer_id", "cust-1")?.run(100).await?;
        let mut seqs = Vec::new();
        for row in rows {
            seqs.push(row.borrow_mut().order_seq()?.unwrap_or(-1));
        }
        Ok(seqs)
    })
    .await
    .unwrap();

    assert_eq!(seqs.len(), TOTAL_ORDERS as usize);
    assert!(seqs.windows(2).all(|w| w[0] < w[1]), "expected ascending order, got {seqs:?}");
}

#[tokio::test]
async fn query_non_key_filter_requires_allow_lazy_filter() {
    let (store, schema, metrics) = env();

    let err = run(store.clone(), schema.clone(), metrics.clone(), TransactionOptions::default(), |tx| async move {
        tx.query::<Order>().eq("status", "placed")?;
        Ok(())
    })
    .await
    .unwrap_err();
    assert!(matches!(err, Error::InvalidParameter(_)), "expected InvalidParameter, got {err:?}");

    run(store, schema, metrics, TransactionOptions::default(), |tx| async move {
        tx.query::<Order>().allow_lazy_filter()?.eq("status", "placed")?;
        Ok(())
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn query_index_requires_inconsistent_read() {
    let (store, schema, metrics) = env();

    let err = run(store, schema, metrics, TransactionOptions::default(), |tx| async move {
        tx.query::<Order>().index("status-index", false)?;
        Ok(())
    })
    .await
    .unwrap_err();

    assert!(
        matches!(err, Error::InconsistentReadRequiredOnIndex("status-index")),
        "expected InconsistentReadRequiredOnIndex, got {err:?}"
    );
}

#[tokio::test]
async fn scan_shard_validates_its_range() {
    let (store, schema, metrics) = env();

    let err = run(store.clone(), schema.clone(), metrics.clone(), TransactionOptions::default(), |tx| async move {
        tx.scan::<Order>().shard(0, 0)?;
        Ok(())
    })
    .await
    .unwrap_err();
    assert!(matches!(err, Error::InvalidParameter(_)), "expected InvalidParameter for zero shard_count, got {err:?}");

    let err = run(store, schema, metrics, TransactionOptions::default(), |tx| async move {
        tx.scan::<Order>().shard(5, 3)?;
        Ok(())
    })
    .await
    .unwrap_err();
    assert!(matches!(err, Error::InvalidParameter(_)), "expected InvalidParameter for out-of-range shard_index, got {err:?}");
}

#[tokio::test]
async fn scan_whole_table_finds_every_row_across_shards() {
    let (store, schema, metrics) = env();
    seed_orders(&store, &schema, &metrics).await;

    let total = run(store, schema, metrics, TransactionOptions::default(), |tx| async move {
        let mut total = 0usize;
        for shard in 0..4u32 {
            let rows = tx.scan::<Order>().shard(shard, 4)?.run(100).await?;
            total += rows.len();
        }
        Ok(total)
    })
    .await
    .unwrap();

    assert_eq!(total, TOTAL_ORDERS as usize);
}
