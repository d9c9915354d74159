//! Integration coverage for concurrent contention against a single sku
//! (decrement) and the restorative law (warmup -> decrement* -> rollback*
//! reproduces remaining == total).

mod support;

use std::sync::Arc;

use seckill_core::audit::AuditLedger;
use seckill_core::db::Db;
use seckill_core::inventory::types::{DecrementResult, RollbackResult};
use seckill_core::inventory::{InventoryEngine, RedisInventoryEngine};
use support::FakeAtomicStore;

async fn mk_engine(store: Arc<FakeAtomicStore>) -> RedisInventoryEngine {
    let db = Db::connect("sqlite::memory:").await.unwrap();
    db.migrate().await.unwrap();
    let ledger = Arc::new(AuditLedger::new(db));
    RedisInventoryEngine::new(store, ledger)
}

/// 1000 concurrent single-unit purchase attempts against 100 units of stock:
/// exactly 100 succeed, the rest see SOLD_OUT, and nothing oversells.
#[tokio::test]
async fn thousand_concurrent_decrements_never_oversell() {
    let store = FakeAtomicStore::new();
    let engine = Arc::new(mk_engine(store.clone()).await);
    engine.warmup("flash-sku", 100).await.unwrap();

    let mut handles = Vec::with_capacity(1000);
    for i in 0..1000 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .decrement("flash-sku", &format!("user-{i}"), 1, 1)
                .await
                .unwrap()
        }));
    }

    let mut ok_count = 0;
    let mut sold_out_count = 0;
    for h in handles {
        match h.await.unwrap() {
            DecrementResult::Ok { .. } => ok_count += 1,
            DecrementResult::SoldOut => sold_out_count += 1,
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    assert_eq!(ok_count, 100);
    assert_eq!(sold_out_count, 900);

    let read = engine.read("flash-sku").await.unwrap();
    assert_eq!(read.remaining, 0);
    assert_eq!(read.sold, 100);
}

/// Every successful decrement rolled back restores stock to exactly what it
/// was before any of them ran, regardless of interleaving.
#[tokio::test]
async fn concurrent_decrement_then_rollback_is_a_no_op_on_stock() {
    let store = FakeAtomicStore::new();
    let engine = Arc::new(mk_engine(store.clone()).await);
    engine.warmup("round-trip-sku", 50).await.unwrap();

    let mut handles = Vec::with_capacity(50);
    for i in 0..50 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            let user = format!("user-{i}");
            let decremented = engine.decrement("round-trip-sku", &user, 1, 1).await.unwrap();
            let order_id = match decremented {
                DecrementResult::Ok { order_id, .. } => order_id,
                other => panic!("expected Ok under uncontended stock, got {other:?}"),
            };
            let rolled_back = engine
                .rollback("round-trip-sku", &user, order_id, 1)
                .await
                .unwrap();
            assert!(matches!(rolled_back, RollbackResult::Ok { .. }));
        }));
    }

    for h in handles {
        h.await.unwrap();
    }

    let read = engine.read("round-trip-sku").await.unwrap();
    assert_eq!(read.remaining, 50);
    assert_eq!(read.sold, 0);
}
