pub mod types;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::instrument;
use uuid::Uuid;

use crate::audit::{AuditEntry, AuditLedger, AuditOp};
use crate::store::{AtomicStore, DecrementOutcome, RollbackOutcome};
use crate::time::now_ms;
use types::{DecrementResult, ReadResult, RollbackResult};

/// Narrowing helper used at the inventory–wire boundary (mirrors the
/// teacher's `u128_to_i64` in `execution/mod.rs`): overflow is explicit and
/// non-silent rather than a wrapping cast.
pub fn i64_to_u64(v: i64) -> anyhow::Result<u64> {
    if v < 0 {
        anyhow::bail!("negative i64 cannot become u64: {v}");
    }
    Ok(v as u64)
}

pub fn u64_to_i64(v: u64) -> anyhow::Result<i64> {
    if v > i64::MAX as u64 {
        anyhow::bail!("u64 too large for i64: {v}");
    }
    Ok(v as i64)
}

/// Atomic check-and-decrement / increment over shared counters (spec §4.5).
/// This trait is the seam tests substitute a fake for, mirroring the
/// teacher's `SessionRepository` seam.
#[async_trait]
pub trait InventoryEngine: Send + Sync {
    async fn warmup(&self, sku_id: &str, stock: u64) -> anyhow::Result<()>;

    async fn decrement(
        &self,
        sku_id: &str,
        user_id: &str,
        quantity: u32,
        user_limit: u32,
    ) -> anyhow::Result<DecrementResult>;

    async fn rollback(
        &self,
        sku_id: &str,
        user_id: &str,
        order_id: Uuid,
        quantity: u32,
    ) -> anyhow::Result<RollbackResult>;

    async fn read(&self, sku_id: &str) -> anyhow::Result<ReadResult>;
}

/// `AtomicStore`-backed implementation. Generates order ids and writes the
/// audit row for every observed decrement before returning to the caller
/// (spec §4.5: "on OK, C5 appends an AuditEntry").
pub struct RedisInventoryEngine {
    store: Arc<dyn AtomicStore>,
    ledger: Arc<AuditLedger>,
}

impl RedisInventoryEngine {
    pub fn new(store: Arc<dyn AtomicStore>, ledger: Arc<AuditLedger>) -> Self {
        Self { store, ledger }
    }
}

#[async_trait]
impl InventoryEngine for RedisInventoryEngine {
    #[instrument(skip(self), target = "inventory", fields(sku_id = %sku_id, stock))]
    async fn warmup(&self, sku_id: &str, stock: u64) -> anyhow::Result<()> {
        self.store.warmup(sku_id, u64_to_i64(stock)?).await
    }

    #[instrument(skip(self), target = "inventory", fields(sku_id = %sku_id, user_id = %user_id, quantity))]
    async fn decrement(
        &self,
        sku_id: &str,
        user_id: &str,
        quantity: u32,
        user_limit: u32,
    ) -> anyhow::Result<DecrementResult> {
        if quantity == 0 {
            return Ok(DecrementResult::Invalid);
        }

        let outcome = self
            .store
            .decrement_with_limit(sku_id, user_id, quantity as i64, user_limit as i64)
            .await?;

        match outcome {
            DecrementOutcome::Invalid => Ok(DecrementResult::Invalid),
            DecrementOutcome::SoldOut => Ok(DecrementResult::SoldOut),
            DecrementOutcome::LimitExceeded => Ok(DecrementResult::LimitExceeded),
            DecrementOutcome::Ok { remaining } => {
                let order_id = Uuid::now_v7();
                let remaining_u = i64_to_u64(remaining)?;
                let before = remaining_u + quantity as u64;

                self.ledger
                    .record(AuditEntry {
                        sku_id: sku_id.to_string(),
                        order_id,
                        op: AuditOp::Decrement,
                        quantity: quantity as i64,
                        before: u64_to_i64(before)?,
                        after: remaining,
                        at_ms: now_ms(),
                    })
                    .await?;

                Ok(DecrementResult::Ok {
                    remaining: remaining_u,
                    order_id,
                })
            }
        }
    }

    #[instrument(skip(self), target = "inventory", fields(sku_id = %sku_id, user_id = %user_id, order_id = %order_id, quantity))]
    async fn rollback(
        &self,
        sku_id: &str,
        user_id: &str,
        order_id: Uuid,
        quantity: u32,
    ) -> anyhow::Result<RollbackResult> {
        if quantity == 0 {
            return Ok(RollbackResult::Invalid);
        }

        let outcome = self
            .store
            .rollback_with_limit(sku_id, user_id, quantity as i64)
            .await?;

        match outcome {
            RollbackOutcome::Invalid => Ok(RollbackResult::Invalid),
            RollbackOutcome::Ok { new_stock } => {
                let new_stock_u = i64_to_u64(new_stock)?;
                let before = new_stock_u.saturating_sub(quantity as u64);

                self.ledger
                    .record(AuditEntry {
                        sku_id: sku_id.to_string(),
                        order_id,
                        op: AuditOp::Rollback,
                        quantity: quantity as i64,
                        before: u64_to_i64(before)?,
                        after: new_stock,
                        at_ms: now_ms(),
                    })
                    .await?;

                Ok(RollbackResult::Ok {
                    new_stock: new_stock_u,
                })
            }
        }
    }

    async fn read(&self, sku_id: &str) -> anyhow::Result<ReadResult> {
        let (stock, sold) = self.store.read(sku_id).await?;
        let remaining = i64_to_u64(stock)?;
        let sold = i64_to_u64(sold)?;
        Ok(ReadResult {
            total: remaining + sold,
            remaining,
            sold,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;
    use std::collections::HashMap;
    use parking_lot::Mutex;

    use crate::store::BucketOutcome;

    #[derive(Default)]
    struct FakeStore {
        stock: Mutex<HashMap<String, i64>>,
        sold: Mutex<HashMap<String, i64>>,
        user_count: Mutex<HashMap<String, i64>>,
    }

    #[async_trait]
    impl AtomicStore for FakeStore {
        async fn warmup(&self, sku_id: &str, stock: i64) -> anyhow::Result<()> {
            self.stock.lock().insert(sku_id.to_string(), stock);
            self.sold.lock().insert(sku_id.to_string(), 0);
            Ok(())
        }

        async fn decrement(&self, _: &str, _: i64) -> anyhow::Result<DecrementOutcome> {
            unreachable!()
        }

        async fn decrement_with_limit(
            &self,
            sku_id: &str,
            user_id: &str,
            qty: i64,
            user_limit: i64,
        ) -> anyhow::Result<DecrementOutcome> {
            if qty <= 0 {
                return Ok(DecrementOutcome::Invalid);
            }
            let count_key = format!("{sku_id}:{user_id}");
            let mut counts = self.user_count.lock();
            let already = *counts.get(&count_key).unwrap_or(&0);
            if already + qty > user_limit {
                return Ok(DecrementOutcome::LimitExceeded);
            }
            let mut stock = self.stock.lock();
            let current = *stock.get(sku_id).unwrap_or(&0);
            if current < qty {
                return Ok(DecrementOutcome::SoldOut);
            }
            let remaining = current - qty;
            stock.insert(sku_id.to_string(), remaining);
            *self.sold.lock().entry(sku_id.to_string()).or_insert(0) += qty;
            *counts.entry(count_key).or_insert(0) += qty;
            Ok(DecrementOutcome::Ok { remaining })
        }

        async fn rollback(&self, _: &str, _: i64) -> anyhow::Result<RollbackOutcome> {
            unreachable!()
        }

        async fn rollback_with_limit(
            &self,
            sku_id: &str,
            user_id: &str,
            qty: i64,
        ) -> anyhow::Result<RollbackOutcome> {
            let mut stock = self.stock.lock();
            let new_stock = stock.entry(sku_id.to_string()).or_insert(0);
            *new_stock += qty;
            let result = *new_stock;
            *self.sold.lock().entry(sku_id.to_string()).or_insert(0) -= qty;
            let count_key = format!("{sku_id}:{user_id}");
            *self.user_count.lock().entry(count_key).or_insert(0) -= qty;
            Ok(RollbackOutcome::Ok { new_stock: result })
        }

        async fn read(&self, sku_id: &str) -> anyhow::Result<(i64, i64)> {
            Ok((
                *self.stock.lock().get(sku_id).unwrap_or(&0),
                *self.sold.lock().get(sku_id).unwrap_or(&0),
            ))
        }

        async fn token_bucket(&self, _: &str, _: f64, _: f64, _: u64) -> anyhow::Result<BucketOutcome> {
            unreachable!()
        }
        async fn incr_device_freq(&self, _: &str, _: u64) -> anyhow::Result<u64> {
            unreachable!()
        }
        async fn get_string(&self, _: &str) -> anyhow::Result<Option<String>> {
            unreachable!()
        }
        async fn set_string(&self, _: &str, _: &str, _: u64) -> anyhow::Result<()> {
            unreachable!()
        }
        async fn del(&self, _: &str) -> anyhow::Result<()> {
            unreachable!()
        }
    }

    async fn test_ledger() -> Arc<AuditLedger> {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        Arc::new(AuditLedger::new(db))
    }

    #[tokio::test]
    async fn single_buyer_sold_out_after_one() {
        let store: Arc<dyn AtomicStore> = Arc::new(FakeStore::default());
        let engine = RedisInventoryEngine::new(store.clone(), test_ledger().await);

        engine.warmup("skuA", 1).await.unwrap();

        let first = engine.decrement("skuA", "u1", 1, 10).await.unwrap();
        assert!(matches!(first, DecrementResult::Ok { remaining: 0, .. }));

        let second = engine.decrement("skuA", "u2", 1, 10).await.unwrap();
        assert_eq!(second, DecrementResult::SoldOut);
    }

    #[tokio::test]
    async fn zero_quantity_is_invalid() {
        let store: Arc<dyn AtomicStore> = Arc::new(FakeStore::default());
        let engine = RedisInventoryEngine::new(store.clone(), test_ledger().await);
        engine.warmup("skuA", 10).await.unwrap();

        let result = engine.decrement("skuA", "u1", 0, 10).await.unwrap();
        assert_eq!(result, DecrementResult::Invalid);
    }

    #[tokio::test]
    async fn rollback_restores_stock() {
        let store: Arc<dyn AtomicStore> = Arc::new(FakeStore::default());
        let engine = RedisInventoryEngine::new(store.clone(), test_ledger().await);
        engine.warmup("skuB", 5).await.unwrap();

        let decremented = engine.decrement("skuB", "u1", 2, 10).await.unwrap();
        let order_id = match decremented {
            DecrementResult::Ok { order_id, .. } => order_id,
            _ => panic!("expected ok"),
        };

        let rolled_back = engine.rollback("skuB", "u1", order_id, 2).await.unwrap();
        assert!(matches!(rolled_back, RollbackResult::Ok { new_stock: 5 }));

        let read = engine.read("skuB").await.unwrap();
        assert_eq!(read.remaining, 5);
        assert_eq!(read.sold, 0);
        assert_eq!(read.total, 5);
    }

    #[tokio::test]
    async fn per_user_limit_is_enforced() {
        let store: Arc<dyn AtomicStore> = Arc::new(FakeStore::default());
        let engine = RedisInventoryEngine::new(store.clone(), test_ledger().await);
        engine.warmup("skuC", 100).await.unwrap();

        engine.decrement("skuC", "u1", 2, 2).await.unwrap();
        let third = engine.decrement("skuC", "u1", 1, 2).await.unwrap();
        assert_eq!(third, DecrementResult::LimitExceeded);
    }
}
