//! Property tests for two invariants spelled out for extra scrutiny: the
//! key-codec round trip, and increment accumulation across repeated
//! transactions.

mod support;

use occdb::prelude::*;
use proptest::prelude::*;
use support::{env, kv, Counter};

fn nul_free_string() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9 _.:/-]{0,24}"
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Encoding one or more key components and decoding the same count of
    /// parts back out always recovers the original strings, for any
    /// separator-free input.
    #[test]
    fn key_round_trip_recovers_every_component(parts in prop::collection::vec(nul_free_string(), 1..4)) {
        const FIELD_NAMES: [&str; 4] = ["field0", "field1", "field2", "field3"];
        let values: Vec<Value> = parts.iter().map(|s| Value::string(s.clone())).collect();
        let refs: Vec<(&'static str, &Value)> = FIELD_NAMES.iter().zip(values.iter()).map(|(n, v)| (*n, v)).collect();

        let encoded = occdb::key::encode(&refs).expect("separator-free strings always encode");
        let decoded = occdb::key::decode_parts(&encoded, parts.len()).expect("decode should recover every part");

        prop_assert_eq!(decoded, parts);
    }

    /// Repeated blind increments on the same counter, each applied in its
    /// own transaction, accumulate exactly as their sum — independent of
    /// how many increments or in what order they arrive.
    #[test]
    fn repeated_increments_accumulate_to_their_sum(deltas in prop::collection::vec(-1000i64..1000i64, 1..12)) {
        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        rt.block_on(async {
            let (store, schema, metrics) = env();
            let counter_id = "proptest-counter";

            run(store.clone(), schema.clone(), metrics.clone(), TransactionOptions::default(), move |tx| async move {
                tx.create::<Counter>(kv(&[("counter_id", Value::string(counter_id)), ("count", Value::number(0))]))?;
                Ok(())
            })
            .await
            .unwrap();

            for delta in &deltas {
                let delta = *delta;
                run(store.clone(), schema.clone(), metrics.clone(), TransactionOptions::default(), move |tx| async move {
                    let model = tx
                        .get::<Counter>(kv(&[("counter_id", Value::string(counter_id))]), false)
                        .await?
                        .expect("row exists");
                    let _ = model.borrow_mut().count()?;
                    model.borrow_mut().increment_count(delta)?;
                    Ok(())
                })
                .await
                .unwrap();
            }

            let total = run(store, schema, metrics, TransactionOptions::default(), move |tx| async move {
                let model = tx
                    .get::<Counter>(kv(&[("counter_id", Value::string(counter_id))]), false)
                    .await?
                    .expect("row exists");
                model.borrow_mut().count()
            })
            .await
            .unwrap();

            prop_assert_eq!(total, Some(deltas.iter().sum::<i64>()));
            Ok(())
        })?;
    }
}
