use async_trait::async_trait;
use sqlx::any::AnyKind;
use sqlx::{AnyPool, Row};

use super::model::{Activity, ActivityStatus};
use super::repository::ActivityRepository;
use crate::db::Db;

pub struct SqlxActivityRepository {
    pool: AnyPool,
}

impl SqlxActivityRepository {
    pub fn new(db: Db) -> Self {
        Self {
            pool: (*db.pool).clone(),
        }
    }

    fn fetch_by_id_sql(&self) -> &'static str {
        match self.pool.any_kind() {
            AnyKind::Postgres => {
                r#"SELECT id, sku_id, name, total_stock, remaining_stock, start_at, end_at,
                          per_user_limit, status, created_at, updated_at
                   FROM activities WHERE id = $1"#
            }
            _ => {
                r#"SELECT id, sku_id, name, total_stock, remaining_stock, start_at, end_at,
                          per_user_limit, status, created_at, updated_at
                   FROM activities WHERE id = ?"#
            }
        }
    }

    fn fetch_by_sku_sql(&self) -> &'static str {
        match self.pool.any_kind() {
            AnyKind::Postgres => {
                r#"SELECT id, sku_id, name, total_stock, remaining_stock, start_at, end_at,
                          per_user_limit, status, created_at, updated_at
                   FROM activities WHERE sku_id = $1 AND status = 'IN_PROGRESS'"#
            }
            _ => {
                r#"SELECT id, sku_id, name, total_stock, remaining_stock, start_at, end_at,
                          per_user_limit, status, created_at, updated_at
                   FROM activities WHERE sku_id = ? AND status = 'IN_PROGRESS'"#
            }
        }
    }

    fn start_sql(&self) -> &'static str {
        match self.pool.any_kind() {
            AnyKind::Postgres => {
                r#"UPDATE activities SET status = 'IN_PROGRESS', updated_at = $1
                   WHERE id = $2 AND status = 'NOT_STARTED'"#
            }
            _ => {
                r#"UPDATE activities SET status = 'IN_PROGRESS', updated_at = ?
                   WHERE id = ? AND status = 'NOT_STARTED'"#
            }
        }
    }

    fn end_sql(&self) -> &'static str {
        match self.pool.any_kind() {
            AnyKind::Postgres => {
                r#"UPDATE activities SET status = 'ENDED', updated_at = $1
                   WHERE id = $2 AND status = 'IN_PROGRESS'"#
            }
            _ => {
                r#"UPDATE activities SET status = 'ENDED', updated_at = ?
                   WHERE id = ? AND status = 'IN_PROGRESS'"#
            }
        }
    }
}

#[async_trait]
impl ActivityRepository for SqlxActivityRepository {
    async fn fetch_by_id(&self, id: &str) -> anyhow::Result<Option<Activity>> {
        let row = sqlx::query(self.fetch_by_id_sql())
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| row_to_activity(&r)).transpose()
    }

    async fn fetch_by_sku(&self, sku_id: &str) -> anyhow::Result<Option<Activity>> {
        let row = sqlx::query(self.fetch_by_sku_sql())
            .bind(sku_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| row_to_activity(&r)).transpose()
    }

    async fn start(&self, id: &str, now_ms: i64) -> anyhow::Result<bool> {
        let result = sqlx::query(self.start_sql())
            .bind(now_ms)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn end(&self, id: &str, now_ms: i64) -> anyhow::Result<bool> {
        let result = sqlx::query(self.end_sql())
            .bind(now_ms)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }
}

fn row_to_activity(row: &sqlx::any::AnyRow) -> anyhow::Result<Activity> {
    let status_str: String = row.try_get("status")?;
    let status = ActivityStatus::parse(&status_str)
        .ok_or_else(|| anyhow::anyhow!("unrecognized activity status: {status_str}"))?;

    Ok(Activity {
        id: row.try_get("id")?,
        sku_id: row.try_get("sku_id")?,
        name: row.try_get("name")?,
        total_stock: row.try_get::<i64, _>("total_stock")? as u64,
        remaining_stock: row.try_get::<i64, _>("remaining_stock")? as u64,
        start_at_ms: row.try_get("start_at")?,
        end_at_ms: row.try_get("end_at")?,
        per_user_limit: row.try_get::<i64, _>("per_user_limit")? as u32,
        status,
        created_at_ms: row.try_get("created_at")?,
        updated_at_ms: row.try_get("updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seed(db: &Db, id: &str, sku: &str, status: &str) {
        sqlx::query(
            r#"INSERT INTO activities
               (id, sku_id, name, total_stock, remaining_stock, start_at, end_at,
                per_user_limit, status, created_at, updated_at)
               VALUES (?, ?, 'Flash Sale', 100, 100, 0, 100000, 2, ?, 0, 0)"#,
        )
        .bind(id)
        .bind(sku)
        .bind(status)
        .execute(&*db.pool)
        .await
        .unwrap();
    }

    async fn test_db() -> Db {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        db
    }

    #[tokio::test]
    async fn fetch_by_id_round_trip() {
        let db = test_db().await;
        seed(&db, "act1", "sku1", "NOT_STARTED").await;
        let repo = SqlxActivityRepository::new(db);

        let activity = repo.fetch_by_id("act1").await.unwrap().unwrap();
        assert_eq!(activity.sku_id, "sku1");
        assert_eq!(activity.status, ActivityStatus::NotStarted);
    }

    #[tokio::test]
    async fn start_transitions_once() {
        let db = test_db().await;
        seed(&db, "act1", "sku1", "NOT_STARTED").await;
        let repo = SqlxActivityRepository::new(db);

        assert!(repo.start("act1", 10).await.unwrap());
        assert!(!repo.start("act1", 20).await.unwrap());

        let activity = repo.fetch_by_id("act1").await.unwrap().unwrap();
        assert_eq!(activity.status, ActivityStatus::InProgress);
    }

    #[tokio::test]
    async fn fetch_by_sku_only_matches_in_progress() {
        let db = test_db().await;
        seed(&db, "act1", "sku1", "NOT_STARTED").await;
        let repo = SqlxActivityRepository::new(db);

        assert!(repo.fetch_by_sku("sku1").await.unwrap().is_none());
        repo.start("act1", 10).await.unwrap();
        assert!(repo.fetch_by_sku("sku1").await.unwrap().is_some());
    }
}
