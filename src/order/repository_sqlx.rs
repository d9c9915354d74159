use async_trait::async_trait;
use sqlx::any::AnyKind;
use sqlx::{AnyPool, Row};
use uuid::Uuid;

use super::model::{Order, OrderHandoff, OrderStatus};
use super::repository::{BatchInsertOutcome, OrderRepository, TimedOutOrder};
use crate::db::Db;

pub struct SqlxOrderRepository {
    pool: AnyPool,
}

impl SqlxOrderRepository {
    pub fn new(db: Db) -> Self {
        Self {
            pool: (*db.pool).clone(),
        }
    }

    fn upsert_sql(&self) -> &'static str {
        match self.pool.any_kind() {
            AnyKind::Postgres => {
                r#"INSERT INTO orders (id, user_id, sku_id, quantity, status, created_at, updated_at)
                   VALUES ($1, $2, $3, $4, 'PENDING_PAYMENT', $5, $5)
                   ON CONFLICT (id) DO NOTHING"#
            }
            _ => {
                r#"INSERT OR IGNORE INTO orders (id, user_id, sku_id, quantity, status, created_at, updated_at)
                   VALUES (?, ?, ?, ?, 'PENDING_PAYMENT', ?, ?)"#
            }
        }
    }

    fn fetch_by_id_sql(&self) -> &'static str {
        match self.pool.any_kind() {
            AnyKind::Postgres => {
                r#"SELECT id, user_id, sku_id, quantity, status, created_at, updated_at
                   FROM orders WHERE id = $1"#
            }
            _ => {
                r#"SELECT id, user_id, sku_id, quantity, status, created_at, updated_at
                   FROM orders WHERE id = ?"#
            }
        }
    }

    fn claim_candidates_sql(&self) -> &'static str {
        match self.pool.any_kind() {
            AnyKind::Postgres => {
                r#"SELECT id, user_id, sku_id, quantity FROM orders
                   WHERE status = 'PENDING_PAYMENT' AND created_at < $1
                   LIMIT $2"#
            }
            _ => {
                r#"SELECT id, user_id, sku_id, quantity FROM orders
                   WHERE status = 'PENDING_PAYMENT' AND created_at < ?
                   LIMIT ?"#
            }
        }
    }

    fn claim_flip_sql(&self) -> &'static str {
        match self.pool.any_kind() {
            AnyKind::Postgres => {
                r#"UPDATE orders SET status = 'TIMEOUT', updated_at = $1
                   WHERE id = $2 AND status = 'PENDING_PAYMENT'"#
            }
            _ => {
                r#"UPDATE orders SET status = 'TIMEOUT', updated_at = ?
                   WHERE id = ? AND status = 'PENDING_PAYMENT'"#
            }
        }
    }
}

#[async_trait]
impl OrderRepository for SqlxOrderRepository {
    async fn batch_insert(
        &self,
        handoffs: &[OrderHandoff],
        now_ms: i64,
    ) -> anyhow::Result<Vec<BatchInsertOutcome>> {
        let sql = self.upsert_sql();
        let mut outcomes = Vec::with_capacity(handoffs.len());

        // Spec §4.7 step 4: all rows in the batch commit or roll back together.
        let mut tx = self.pool.begin().await?;

        for h in handoffs {
            let result = sqlx::query(sql)
                .bind(h.order_id.to_string())
                .bind(&h.user_id)
                .bind(&h.sku_id)
                .bind(h.quantity as i64)
                .bind(now_ms)
                .execute(&mut *tx)
                .await;

            outcomes.push(match result {
                Ok(_) => BatchInsertOutcome {
                    order_id: h.order_id,
                    succeeded: true,
                    error: None,
                },
                Err(e) => BatchInsertOutcome {
                    order_id: h.order_id,
                    succeeded: false,
                    error: Some(e.to_string()),
                },
            });
        }

        tx.commit().await?;

        Ok(outcomes)
    }

    async fn fetch_by_id(&self, order_id: Uuid) -> anyhow::Result<Option<Order>> {
        let row = sqlx::query(self.fetch_by_id_sql())
            .bind(order_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| row_to_order(&r)).transpose()
    }

    async fn claim_timed_out(
        &self,
        pay_window_seconds: i64,
        now_ms: i64,
        limit: i64,
    ) -> anyhow::Result<Vec<TimedOutOrder>> {
        let deadline_ms = now_ms - pay_window_seconds * 1000;

        let candidates = sqlx::query(self.claim_candidates_sql())
            .bind(deadline_ms)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        let mut flipped = Vec::new();
        for row in candidates {
            let id: String = row.try_get("id")?;
            let result = sqlx::query(self.claim_flip_sql())
                .bind(now_ms)
                .bind(&id)
                .execute(&self.pool)
                .await?;

            if result.rows_affected() == 1 {
                flipped.push(TimedOutOrder {
                    order_id: Uuid::parse_str(&id)?,
                    user_id: row.try_get("user_id")?,
                    sku_id: row.try_get("sku_id")?,
                    quantity: row.try_get::<i64, _>("quantity")? as u32,
                });
            }
        }

        Ok(flipped)
    }
}

fn row_to_order(row: &sqlx::any::AnyRow) -> anyhow::Result<Order> {
    let status_str: String = row.try_get("status")?;
    let status = OrderStatus::parse(&status_str)
        .ok_or_else(|| anyhow::anyhow!("unrecognized order status: {status_str}"))?;
    let id_str: String = row.try_get("id")?;

    Ok(Order {
        id: Uuid::parse_str(&id_str)?,
        user_id: row.try_get("user_id")?,
        sku_id: row.try_get("sku_id")?,
        quantity: row.try_get::<i64, _>("quantity")? as u32,
        status,
        created_at_ms: row.try_get("created_at")?,
        updated_at_ms: row.try_get("updated_at")?,
    })
}
