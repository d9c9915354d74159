//! Audit ledger (C10): append-only record of every decrement/rollback,
//! used to reconcile against the shared store's live counters (spec §4.10,
//! P2 in spec §8).

use sqlx::any::AnyKind;
use sqlx::Row;
use tracing::instrument;
use uuid::Uuid;

use crate::db::Db;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuditOp {
    Decrement,
    Rollback,
}

impl AuditOp {
    fn as_str(self) -> &'static str {
        match self {
            AuditOp::Decrement => "DECREMENT",
            AuditOp::Rollback => "ROLLBACK",
        }
    }
}

#[derive(Clone, Debug)]
pub struct AuditEntry {
    pub sku_id: String,
    pub order_id: Uuid,
    pub op: AuditOp,
    pub quantity: i64,
    pub before: i64,
    pub after: i64,
    pub at_ms: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconciliationReport {
    pub sku_id_matches: bool,
    pub ledger_sum: i64,
    pub live_sold: i64,
}

pub struct AuditLedger {
    db: Db,
}

impl AuditLedger {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    fn record_sql(&self) -> &'static str {
        match self.db.pool.any_kind() {
            AnyKind::Postgres => {
                r#"INSERT INTO stock_log (id, sku_id, order_id, op, qty, before_qty, after_qty, at)
                   VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"#
            }
            _ => {
                r#"INSERT INTO stock_log (id, sku_id, order_id, op, qty, before_qty, after_qty, at)
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#
            }
        }
    }

    fn reconcile_sql(&self) -> &'static str {
        match self.db.pool.any_kind() {
            AnyKind::Postgres => {
                r#"SELECT
                     COALESCE(SUM(CASE WHEN op = 'DECREMENT' THEN qty ELSE -qty END), 0) AS ledger_sum
                   FROM stock_log WHERE sku_id = $1"#
            }
            _ => {
                r#"SELECT
                     COALESCE(SUM(CASE WHEN op = 'DECREMENT' THEN qty ELSE -qty END), 0) AS ledger_sum
                   FROM stock_log WHERE sku_id = ?"#
            }
        }
    }

    #[instrument(skip(self), target = "audit", fields(sku_id = %entry.sku_id, order_id = %entry.order_id, op = entry.op.as_str()))]
    pub async fn record(&self, entry: AuditEntry) -> anyhow::Result<()> {
        sqlx::query(self.record_sql())
            .bind(Uuid::new_v4().to_string())
            .bind(&entry.sku_id)
            .bind(entry.order_id.to_string())
            .bind(entry.op.as_str())
            .bind(entry.quantity)
            .bind(entry.before)
            .bind(entry.after)
            .bind(entry.at_ms as i64)
            .execute(&*self.db.pool)
            .await?;

        Ok(())
    }

    /// Sums signed stock_log deltas for a sku and compares against the live
    /// `sold` counter passed in by the caller (read separately from the
    /// shared store). Not on the hot path; a maintenance/reconciliation
    /// operation only (spec §4.10).
    pub async fn reconcile(&self, sku_id: &str, live_sold: i64) -> anyhow::Result<ReconciliationReport> {
        let row = sqlx::query(self.reconcile_sql())
            .bind(sku_id)
            .fetch_one(&*self.db.pool)
            .await?;

        let ledger_sum: i64 = row.try_get("ledger_sum")?;

        Ok(ReconciliationReport {
            sku_id_matches: ledger_sum == live_sold,
            ledger_sum,
            live_sold,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_db() -> Db {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        db
    }

    #[tokio::test]
    async fn records_and_reconciles() {
        let db = test_db().await;
        let ledger = AuditLedger::new(db);

        let order_id = Uuid::new_v4();
        ledger
            .record(AuditEntry {
                sku_id: "sku1".into(),
                order_id,
                op: AuditOp::Decrement,
                quantity: 3,
                before: 10,
                after: 7,
                at_ms: 1000,
            })
            .await
            .unwrap();

        let report = ledger.reconcile("sku1", 3).await.unwrap();
        assert!(report.sku_id_matches);
        assert_eq!(report.ledger_sum, 3);
    }

    #[tokio::test]
    async fn rollback_nets_out_in_reconciliation() {
        let db = test_db().await;
        let ledger = AuditLedger::new(db);

        let order_id = Uuid::new_v4();
        ledger
            .record(AuditEntry {
                sku_id: "sku2".into(),
                order_id,
                op: AuditOp::Decrement,
                quantity: 5,
                before: 10,
                after: 5,
                at_ms: 1000,
            })
            .await
            .unwrap();
        ledger
            .record(AuditEntry {
                sku_id: "sku2".into(),
                order_id,
                op: AuditOp::Rollback,
                quantity: 5,
                before: 5,
                after: 10,
                at_ms: 2000,
            })
            .await
            .unwrap();

        let report = ledger.reconcile("sku2", 0).await.unwrap();
        assert!(report.sku_id_matches);
        assert_eq!(report.ledger_sum, 0);
    }
}
