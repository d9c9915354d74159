use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

/// Per-sku admission parameters for the token-bucket script (spec §4.4).
#[derive(Clone, Copy, Debug)]
pub struct BucketParams {
    pub capacity: f64,
    pub refill_rate: f64,
}

impl Default for BucketParams {
    fn default() -> Self {
        Self {
            capacity: 10.0,
            refill_rate: 5.0,
        }
    }
}

/// Risk-score thresholds used by the risk assessor (C3) to map a composite
/// score onto LOW/MEDIUM/HIGH.
#[derive(Clone, Copy, Debug)]
pub struct RiskThresholds {
    pub t_low: f64,
    pub t_high: f64,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            t_low: 40.0,
            t_high: 75.0,
        }
    }
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Relational system-of-record connection string.
    pub database_url: String,

    /// Shared atomic store (C1) connection string.
    pub redis_url: String,

    /// Durable partitioned log (C2) bootstrap servers.
    pub kafka_brokers: String,

    /// Hand-off topic name (spec §6 default `seckill-orders`).
    pub orders_topic: String,

    /// Dead-letter topic name (spec §6 default `seckill-orders-dlq`).
    pub dlq_topic: String,

    /// Log partition count. Changing this requires rebalancing and is not
    /// performed automatically.
    pub partition_count: u32,

    // =========================
    // Order consumer (C7) configuration
    // =========================
    /// Maximum records buffered per partition worker before a forced flush.
    ///
    /// Purpose:
    /// - bound per-worker memory
    /// - bound DB transaction size
    pub batch_size: usize,

    /// Periodic flush interval in milliseconds, applied even if `batch_size`
    /// has not been reached.
    pub flush_interval_ms: u64,

    /// Number of failed flush attempts tolerated for a given order id before
    /// it is routed to the dead-letter topic.
    pub max_retry: u32,

    // =========================
    // Timeout reaper (C8) configuration
    // =========================
    /// How often the reaper scans for unpaid orders past their deadline.
    pub reaper_scan_interval_ms: u64,

    /// Payment window: an order still PENDING_PAYMENT this many seconds
    /// after creation is eligible for timeout rollback.
    pub pay_window_seconds: i64,

    /// Maximum rows the reaper claims per scan (bounds a single tick's work).
    pub reaper_batch_limit: i64,

    // =========================
    // Admission controller (C4) configuration
    // =========================
    /// Default bucket parameters, used for any sku without an explicit
    /// override in `bucket_overrides`.
    pub default_bucket: BucketParams,

    /// Per-sku overrides, behind a lock so an (out-of-scope) admin path can
    /// mutate capacity/rate live. Reading through this handle per-request
    /// (rather than baking the values into the script call site) is what
    /// lets them change without a restart, per spec §4.4.
    pub bucket_overrides: Arc<RwLock<HashMap<String, BucketParams>>>,

    // =========================
    // Risk assessor (C3) configuration
    // =========================
    pub risk_thresholds: RiskThresholds,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://seckill_dev.db".to_string());
        let redis_url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        let kafka_brokers = std::env::var("KAFKA_BROKERS")
            .unwrap_or_else(|_| "localhost:9092".to_string());

        Self {
            database_url,
            redis_url,
            kafka_brokers,
            orders_topic: std::env::var("ORDERS_TOPIC")
                .unwrap_or_else(|_| "seckill-orders".to_string()),
            dlq_topic: std::env::var("ORDERS_DLQ_TOPIC")
                .unwrap_or_else(|_| "seckill-orders-dlq".to_string()),
            partition_count: 100,

            batch_size: 100,
            flush_interval_ms: 5_000,
            max_retry: 3,

            reaper_scan_interval_ms: 60_000,
            pay_window_seconds: 15 * 60,
            reaper_batch_limit: 500,

            default_bucket: BucketParams::default(),
            bucket_overrides: Arc::new(RwLock::new(HashMap::new())),

            risk_thresholds: RiskThresholds::default(),
        }
    }

    /// Resolves the effective bucket parameters for a sku, falling back to
    /// the process-wide default when no override is configured.
    pub fn bucket_for(&self, sku_id: &str) -> BucketParams {
        self.bucket_overrides
            .read()
            .get(sku_id)
            .copied()
            .unwrap_or(self.default_bucket)
    }

    /// Sets or clears the live override for one sku. The (out-of-scope) admin
    /// path that would call this is not implemented here; only the data
    /// shape that makes live mutation possible is.
    pub fn set_bucket_override(&self, sku_id: &str, params: BucketParams) {
        self.bucket_overrides.write().insert(sku_id.to_string(), params);
    }
}
