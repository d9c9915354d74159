use async_trait::async_trait;
use uuid::Uuid;

use super::model::{Order, OrderHandoff};

/// A per-row outcome from a batch insert, used by C7 to decide retry vs.
/// dead-letter routing per handoff.
#[derive(Clone, Debug)]
pub struct BatchInsertOutcome {
    pub order_id: Uuid,
    pub succeeded: bool,
    pub error: Option<String>,
}

/// A row that C8's CAS transition actually flipped, paired with enough
/// information to drive the compensating inventory rollback.
#[derive(Clone, Debug)]
pub struct TimedOutOrder {
    pub order_id: Uuid,
    pub user_id: String,
    pub sku_id: String,
    pub quantity: u32,
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Idempotent upsert keyed on order id (spec §4.7 step 4): replay of the
    /// same handoff produces at-most-one row.
    async fn batch_insert(&self, handoffs: &[OrderHandoff], now_ms: i64) -> anyhow::Result<Vec<BatchInsertOutcome>>;

    async fn fetch_by_id(&self, order_id: Uuid) -> anyhow::Result<Option<Order>>;

    /// CAS-transitions PENDING_PAYMENT orders older than `pay_window_seconds`
    /// to TIMEOUT, returning only the rows this call actually flipped
    /// (spec §4.8 step 1).
    async fn claim_timed_out(
        &self,
        pay_window_seconds: i64,
        now_ms: i64,
        limit: i64,
    ) -> anyhow::Result<Vec<TimedOutOrder>>;
}
