use sqlx::AnyPool;

/// Creates the relational schema from spec §6 if it does not already exist.
pub async fn migrate(pool: &AnyPool) -> anyhow::Result<()> {
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS activities (
  id TEXT PRIMARY KEY,
  sku_id TEXT NOT NULL,
  name TEXT NOT NULL,
  total_stock BIGINT NOT NULL,
  remaining_stock BIGINT NOT NULL,
  start_at BIGINT NOT NULL,
  end_at BIGINT NOT NULL,
  per_user_limit INTEGER NOT NULL,
  status TEXT NOT NULL,
  created_at BIGINT NOT NULL,
  updated_at BIGINT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_activities_sku ON activities(sku_id);"#)
        .execute(pool)
        .await?;
    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_activities_start ON activities(start_at);"#)
        .execute(pool)
        .await?;
    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_activities_status ON activities(status);"#)
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS orders (
  id TEXT PRIMARY KEY,
  user_id TEXT NOT NULL,
  sku_id TEXT NOT NULL,
  quantity BIGINT NOT NULL,
  status TEXT NOT NULL,
  created_at BIGINT NOT NULL,
  updated_at BIGINT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE INDEX IF NOT EXISTS idx_orders_user_created ON orders(user_id, created_at);"#,
    )
    .execute(pool)
    .await?;
    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_orders_sku_status ON orders(sku_id, status);"#)
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS stock_log (
  id TEXT PRIMARY KEY,
  sku_id TEXT NOT NULL,
  order_id TEXT NOT NULL,
  op TEXT NOT NULL,
  qty BIGINT NOT NULL,
  before_qty BIGINT NOT NULL,
  after_qty BIGINT NOT NULL,
  at BIGINT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_stock_log_sku ON stock_log(sku_id);"#)
        .execute(pool)
        .await?;
    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_stock_log_order ON stock_log(order_id);"#)
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS dead_letters (
  order_id TEXT PRIMARY KEY,
  user_id TEXT NOT NULL,
  sku_id TEXT NOT NULL,
  quantity BIGINT NOT NULL,
  error TEXT NOT NULL,
  retry_count INTEGER NOT NULL,
  source_partition INTEGER NOT NULL,
  source_offset BIGINT NOT NULL,
  created_at BIGINT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
