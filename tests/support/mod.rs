//! Shared fakes for the integration suite. An in-process stand-in for the
//! shared atomic store (C1) that reproduces the same semantics as the Lua
//! scripts in `src/store/scripts.rs` under a single mutex per key, so
//! concurrency tests can exercise real contention without a Redis instance.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use seckill_core::store::{AtomicStore, BucketOutcome, DecrementOutcome, RollbackOutcome};

#[derive(Default)]
struct Inner {
    stock: HashMap<String, i64>,
    sold: HashMap<String, i64>,
    user_count: HashMap<String, i64>,
    strings: HashMap<String, String>,
}

/// Single global lock, matching the fact that every real script below runs
/// atomically server-side; callers only ever observe before/after states.
pub struct FakeAtomicStore {
    inner: Mutex<Inner>,
}

impl FakeAtomicStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner::default()),
        })
    }
}

#[async_trait]
impl AtomicStore for FakeAtomicStore {
    async fn warmup(&self, sku_id: &str, stock: i64) -> anyhow::Result<()> {
        let mut inner = self.inner.lock();
        inner.stock.insert(sku_id.to_string(), stock);
        inner.sold.insert(sku_id.to_string(), 0);
        Ok(())
    }

    async fn decrement(&self, sku_id: &str, qty: i64) -> anyhow::Result<DecrementOutcome> {
        if qty <= 0 {
            return Ok(DecrementOutcome::Invalid);
        }
        let mut inner = self.inner.lock();
        let current = *inner.stock.get(sku_id).unwrap_or(&0);
        if current < qty {
            return Ok(DecrementOutcome::SoldOut);
        }
        let remaining = current - qty;
        inner.stock.insert(sku_id.to_string(), remaining);
        *inner.sold.entry(sku_id.to_string()).or_insert(0) += qty;
        Ok(DecrementOutcome::Ok { remaining })
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
        let mut inner = self.inner.lock();

        let already = *inner.user_count.get(&count_key).unwrap_or(&0);
        if already + qty > user_limit {
            return Ok(DecrementOutcome::LimitExceeded);
        }

        let current = *inner.stock.get(sku_id).unwrap_or(&0);
        if current < qty {
            return Ok(DecrementOutcome::SoldOut);
        }

        let remaining = current - qty;
        inner.stock.insert(sku_id.to_string(), remaining);
        *inner.sold.entry(sku_id.to_string()).or_insert(0) += qty;
        *inner.user_count.entry(count_key).or_insert(0) += qty;
        Ok(DecrementOutcome::Ok { remaining })
    }

    async fn rollback(&self, sku_id: &str, qty: i64) -> anyhow::Result<RollbackOutcome> {
        let mut inner = self.inner.lock();
        let current = *inner.stock.get(sku_id).unwrap_or(&0);
        let sold = *inner.sold.get(sku_id).unwrap_or(&0);
        if sold < qty {
            return Ok(RollbackOutcome::Invalid);
        }
        let new_stock = current + qty;
        inner.stock.insert(sku_id.to_string(), new_stock);
        *inner.sold.entry(sku_id.to_string()).or_insert(0) -= qty;
        Ok(RollbackOutcome::Ok { new_stock })
    }

    async fn rollback_with_limit(
        &self,
        sku_id: &str,
        user_id: &str,
        qty: i64,
    ) -> anyhow::Result<RollbackOutcome> {
        let count_key = format!("{sku_id}:{user_id}");
        let mut inner = self.inner.lock();
        let current = *inner.stock.get(sku_id).unwrap_or(&0);
        let sold = *inner.sold.get(sku_id).unwrap_or(&0);
        if sold < qty {
            return Ok(RollbackOutcome::Invalid);
        }
        let new_stock = current + qty;
        inner.stock.insert(sku_id.to_string(), new_stock);
        *inner.sold.entry(sku_id.to_string()).or_insert(0) -= qty;
        let count = inner.user_count.entry(count_key).or_insert(0);
        *count -= qty;
        Ok(RollbackOutcome::Ok { new_stock })
    }

    async fn read(&self, sku_id: &str) -> anyhow::Result<(i64, i64)> {
        let inner = self.inner.lock();
        Ok((
            *inner.stock.get(sku_id).unwrap_or(&0),
            *inner.sold.get(sku_id).unwrap_or(&0),
        ))
    }

    async fn token_bucket(
        &self,
        _sku_id: &str,
        _capacity: f64,
        _rate: f64,
        _now_ms: u64,
    ) -> anyhow::Result<BucketOutcome> {
        Ok(BucketOutcome::Acquired)
    }

    async fn incr_device_freq(&self, _device_id: &str, _window_secs: u64) -> anyhow::Result<u64> {
        Ok(1)
    }

    async fn get_string(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.inner.lock().strings.get(key).cloned())
    }

    async fn set_string(&self, key: &str, value: &str, _ttl_secs: u64) -> anyhow::Result<()> {
        self.inner.lock().strings.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn del(&self, key: &str) -> anyhow::Result<()> {
        self.inner.lock().strings.remove(key);
        Ok(())
    }
}

/// A `FakeAtomicStore` wired with a capacity-limited token bucket state, used
/// by the admission-shedding scenario where the always-acquire behavior
/// above would hide the thing under test.
pub struct BoundedBucketStore {
    base: Arc<FakeAtomicStore>,
    tokens: Mutex<f64>,
}

impl BoundedBucketStore {
    pub fn new(initial_tokens: f64) -> Arc<Self> {
        Arc::new(Self {
            base: FakeAtomicStore::new(),
            tokens: Mutex::new(initial_tokens),
        })
    }
}

#[async_trait]
impl AtomicStore for BoundedBucketStore {
    async fn warmup(&self, sku_id: &str, stock: i64) -> anyhow::Result<()> {
        self.base.warmup(sku_id, stock).await
    }
    async fn decrement(&self, sku_id: &str, qty: i64) -> anyhow::Result<DecrementOutcome> {
        self.base.decrement(sku_id, qty).await
    }
    async fn decrement_with_limit(
        &self,
        sku_id: &str,
        user_id: &str,
        qty: i64,
        user_limit: i64,
    ) -> anyhow::Result<DecrementOutcome> {
        self.base.decrement_with_limit(sku_id, user_id, qty, user_limit).await
    }
    async fn rollback(&self, sku_id: &str, qty: i64) -> anyhow::Result<RollbackOutcome> {
        self.base.rollback(sku_id, qty).await
    }
    async fn rollback_with_limit(
        &self,
        sku_id: &str,
        user_id: &str,
        qty: i64,
    ) -> anyhow::Result<RollbackOutcome> {
        self.base.rollback_with_limit(sku_id, user_id, qty).await
    }
    async fn read(&self, sku_id: &str) -> anyhow::Result<(i64, i64)> {
        self.base.read(sku_id).await
    }

    /// Single-token-per-call bucket with a fixed capacity and no refill,
    /// enough to make a handful of calls shed deterministically in a test
    /// without depending on wall-clock refill timing.
    async fn token_bucket(
        &self,
        _sku_id: &str,
        _capacity: f64,
        _rate: f64,
        _now_ms: u64,
    ) -> anyhow::Result<BucketOutcome> {
        let mut tokens = self.tokens.lock();
        if *tokens >= 1.0 {
            *tokens -= 1.0;
            Ok(BucketOutcome::Acquired)
        } else {
            Ok(BucketOutcome::Denied { tokens_remaining: *tokens })
        }
    }

    async fn incr_device_freq(&self, device_id: &str, window_secs: u64) -> anyhow::Result<u64> {
        self.base.incr_device_freq(device_id, window_secs).await
    }
    async fn get_string(&self, key: &str) -> anyhow::Result<Option<String>> {
        self.base.get_string(key).await
    }
    async fn set_string(&self, key: &str, value: &str, ttl_secs: u64) -> anyhow::Result<()> {
        self.base.set_string(key, value, ttl_secs).await
    }
    async fn del(&self, key: &str) -> anyhow::Result<()> {
        self.base.del(key).await
    }
}
