pub mod scripts;

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tracing::instrument;

use crate::logger::warn_if_slow;

/// Outcome of a `decrement` / `decrement_with_limit` call (spec §4.5).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecrementOutcome {
    Ok { remaining: i64 },
    SoldOut,
    Invalid,
    LimitExceeded,
}

/// Outcome of a `rollback` call (spec §4.5).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RollbackOutcome {
    Ok { new_stock: i64 },
    Invalid,
}

/// Outcome of a `token_bucket` call (spec §4.4).
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BucketOutcome {
    Acquired,
    Denied { tokens_remaining: f64 },
}

/// Abstraction over the shared atomic store (C1): per-sku inventory
/// counters, per-sku token buckets, and per-device/per-user risk state.
///
/// All multi-key operations are single atomic scripts (spec §4.4/§4.5); this
/// trait is the seam tests substitute an in-process fake for, mirroring the
/// `SessionRepository` seam the teacher uses for its persistence layer.
#[async_trait]
pub trait AtomicStore: Send + Sync {
    async fn warmup(&self, sku_id: &str, stock: i64) -> anyhow::Result<()>;

    async fn decrement(&self, sku_id: &str, qty: i64) -> anyhow::Result<DecrementOutcome>;

    async fn decrement_with_limit(
        &self,
        sku_id: &str,
        user_id: &str,
        qty: i64,
        user_limit: i64,
    ) -> anyhow::Result<DecrementOutcome>;

    async fn rollback(&self, sku_id: &str, qty: i64) -> anyhow::Result<RollbackOutcome>;

    async fn rollback_with_limit(
        &self,
        sku_id: &str,
        user_id: &str,
        qty: i64,
    ) -> anyhow::Result<RollbackOutcome>;

    async fn read(&self, sku_id: &str) -> anyhow::Result<(i64, i64)>;

    async fn token_bucket(
        &self,
        sku_id: &str,
        capacity: f64,
        rate: f64,
        now_ms: u64,
    ) -> anyhow::Result<BucketOutcome>;

    /// Increments the device-level request counter for the current window
    /// and returns the post-increment count, setting the TTL on first write.
    async fn incr_device_freq(&self, device_id: &str, window_secs: u64) -> anyhow::Result<u64>;

    /// Raw string get/set pair used to store a device's `RiskProfile` and a
    /// user's outstanding captcha challenge (spec §3 `RiskProfile`).
    async fn get_string(&self, key: &str) -> anyhow::Result<Option<String>>;
    async fn set_string(&self, key: &str, value: &str, ttl_secs: u64) -> anyhow::Result<()>;
    async fn del(&self, key: &str) -> anyhow::Result<()>;
}

fn stock_key(sku_id: &str) -> String {
    format!("stock:sku_{sku_id}")
}

fn sold_key(sku_id: &str) -> String {
    format!("sold:sku_{sku_id}")
}

fn user_count_key(sku_id: &str, user_id: &str) -> String {
    format!("ucount:{sku_id}:{user_id}")
}

fn bucket_tokens_key(sku_id: &str) -> String {
    format!("tb:{sku_id}")
}

fn bucket_ts_key(sku_id: &str) -> String {
    format!("tb_ts:{sku_id}")
}

/// Redis-backed implementation of `AtomicStore`.
pub struct RedisStore {
    conn: ConnectionManager,
    decrement_script: redis::Script,
    decrement_with_limit_script: redis::Script,
    rollback_script: redis::Script,
    rollback_with_limit_script: redis::Script,
    token_bucket_script: redis::Script,
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;

        Ok(Self {
            conn,
            decrement_script: redis::Script::new(scripts::DECREMENT),
            decrement_with_limit_script: redis::Script::new(scripts::DECREMENT_WITH_LIMIT),
            rollback_script: redis::Script::new(scripts::ROLLBACK),
            rollback_with_limit_script: redis::Script::new(scripts::ROLLBACK_WITH_LIMIT),
            token_bucket_script: redis::Script::new(scripts::TOKEN_BUCKET),
        })
    }
}

#[async_trait]
impl AtomicStore for RedisStore {
    #[instrument(skip(self), target = "store", fields(sku_id = %sku_id, stock))]
    async fn warmup(&self, sku_id: &str, stock: i64) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.set(stock_key(sku_id), stock).await?;
        let _: () = conn.set(sold_key(sku_id), 0i64).await?;
        Ok(())
    }

    #[instrument(skip(self), target = "store", fields(sku_id = %sku_id, qty))]
    async fn decrement(&self, sku_id: &str, qty: i64) -> anyhow::Result<DecrementOutcome> {
        let mut conn = self.conn.clone();
        let result: i64 = warn_if_slow("redis_decrement", Duration::from_millis(50), async {
            self.decrement_script
                .key(stock_key(sku_id))
                .key(sold_key(sku_id))
                .arg(qty)
                .invoke_async(&mut conn)
                .await
        })
        .await?;

        Ok(match result {
            -1 => DecrementOutcome::Invalid,
            0 => DecrementOutcome::SoldOut,
            remaining => DecrementOutcome::Ok { remaining },
        })
    }

    #[instrument(skip(self), target = "store", fields(sku_id = %sku_id, user_id = %user_id, qty, user_limit))]
    async fn decrement_with_limit(
        &self,
        sku_id: &str,
        user_id: &str,
        qty: i64,
        user_limit: i64,
    ) -> anyhow::Result<DecrementOutcome> {
        let mut conn = self.conn.clone();
        let result: i64 = warn_if_slow(
            "redis_decrement_with_limit",
            Duration::from_millis(50),
            async {
                self.decrement_with_limit_script
                    .key(stock_key(sku_id))
                    .key(sold_key(sku_id))
                    .key(user_count_key(sku_id, user_id))
                    .arg(qty)
                    .arg(user_limit)
                    .invoke_async(&mut conn)
                    .await
            },
        )
        .await?;

        Ok(match result {
            -1 => DecrementOutcome::Invalid,
            -2 => DecrementOutcome::LimitExceeded,
            0 => DecrementOutcome::SoldOut,
            remaining => DecrementOutcome::Ok { remaining },
        })
    }

    #[instrument(skip(self), target = "store", fields(sku_id = %sku_id, qty))]
    async fn rollback(&self, sku_id: &str, qty: i64) -> anyhow::Result<RollbackOutcome> {
        let mut conn = self.conn.clone();
        let result: i64 = self
            .rollback_script
            .key(stock_key(sku_id))
            .key(sold_key(sku_id))
            .arg(qty)
            .invoke_async(&mut conn)
            .await?;

        Ok(match result {
            -1 => RollbackOutcome::Invalid,
            new_stock => RollbackOutcome::Ok { new_stock },
        })
    }

    #[instrument(skip(self), target = "store", fields(sku_id = %sku_id, user_id = %user_id, qty))]
    async fn rollback_with_limit(
        &self,
        sku_id: &str,
        user_id: &str,
        qty: i64,
    ) -> anyhow::Result<RollbackOutcome> {
        let mut conn = self.conn.clone();
        let result: i64 = self
            .rollback_with_limit_script
            .key(stock_key(sku_id))
            .key(sold_key(sku_id))
            .key(user_count_key(sku_id, user_id))
            .arg(qty)
            .invoke_async(&mut conn)
            .await?;

        Ok(match result {
            -1 => RollbackOutcome::Invalid,
            new_stock => RollbackOutcome::Ok { new_stock },
        })
    }

    async fn read(&self, sku_id: &str) -> anyhow::Result<(i64, i64)> {
        let mut conn = self.conn.clone();
        let stock: Option<i64> = conn.get(stock_key(sku_id)).await?;
        let sold: Option<i64> = conn.get(sold_key(sku_id)).await?;
        Ok((stock.unwrap_or(0), sold.unwrap_or(0)))
    }

    #[instrument(skip(self), target = "store", fields(sku_id = %sku_id, capacity, rate))]
    async fn token_bucket(
        &self,
        sku_id: &str,
        capacity: f64,
        rate: f64,
        now_ms: u64,
    ) -> anyhow::Result<BucketOutcome> {
        let mut conn = self.conn.clone();
        let (acquired, tokens_left): (i64, String) =
            warn_if_slow("redis_token_bucket", Duration::from_millis(50), async {
                self.token_bucket_script
                    .key(bucket_tokens_key(sku_id))
                    .key(bucket_ts_key(sku_id))
                    .arg(capacity)
                    .arg(rate)
                    .arg(now_ms)
                    .invoke_async(&mut conn)
                    .await
            })
            .await?;

        Ok(if acquired == 1 {
            BucketOutcome::Acquired
        } else {
            BucketOutcome::Denied {
                tokens_remaining: tokens_left.parse().unwrap_or(0.0),
            }
        })
    }

    async fn incr_device_freq(&self, device_id: &str, window_secs: u64) -> anyhow::Result<u64> {
        let mut conn = self.conn.clone();
        let key = format!("risk_freq:{device_id}");
        let count: u64 = conn.incr(&key, 1u64).await?;
        if count == 1 {
            let _: () = conn.expire(&key, window_secs as i64).await?;
        }
        Ok(count)
    }

    async fn get_string(&self, key: &str) -> anyhow::Result<Option<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.get(key).await?)
    }

    async fn set_string(&self, key: &str, value: &str, ttl_secs: u64) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(key, value, ttl_secs).await?;
        Ok(())
    }

    async fn del(&self, key: &str) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }
}
