use std::collections::HashSet;
use std::sync::Arc;

use rdkafka::ClientConfig;
use rdkafka::consumer::StreamConsumer;
use rdkafka::producer::FutureProducer;

use seckill_core::activity::SqlxActivityRepository;
use seckill_core::admission::AdmissionController;
use seckill_core::audit::AuditLedger;
use seckill_core::config::AppConfig;
use seckill_core::db::Db;
use seckill_core::inventory::RedisInventoryEngine;
use seckill_core::logger::init_tracing;
use seckill_core::metrics::Counters;
use seckill_core::order::{
    ConsumerConfig, ConsumerRouter, KafkaDeadLetterSink, KafkaHandoffSource, OrderProducer,
    SqlxOrderRepository,
};
use seckill_core::pipeline::RequestPipeline;
use seckill_core::reaper::{ReaperConfig, TimeoutReaper};
use seckill_core::risk::RiskAssessor;
use seckill_core::store::RedisStore;

/// Connects the relational system of record and runs schema migration.
async fn init_db(cfg: &AppConfig) -> anyhow::Result<Db> {
    sqlx::any::install_default_drivers();
    let db = Db::connect(&cfg.database_url).await?;
    db.migrate().await?;
    Ok(db)
}

/// Builds the Kafka consumer used by the order consumer (C7). Manual commit
/// only, group-managed partition assignment across `orders_topic`.
fn build_kafka_consumer(cfg: &AppConfig) -> anyhow::Result<StreamConsumer> {
    let consumer: StreamConsumer = ClientConfig::new()
        .set("bootstrap.servers", &cfg.kafka_brokers)
        .set("group.id", "seckill-order-consumer")
        .set("enable.auto.commit", "false")
        .set("auto.offset.reset", "earliest")
        .create()?;

    Ok(consumer)
}

fn build_kafka_producer(cfg: &AppConfig) -> anyhow::Result<FutureProducer> {
    let producer: FutureProducer = ClientConfig::new()
        .set("bootstrap.servers", &cfg.kafka_brokers)
        .set("message.timeout.ms", "5000")
        .create()?;

    Ok(producer)
}

/// Starts the order consumer (C7): subscribes to `orders_topic` and drains
/// it into the relational store at the configured batch size / flush
/// interval.
fn start_order_consumer(
    cfg: &AppConfig,
    db: Db,
    dlq_producer: FutureProducer,
    counters: Counters,
) -> anyhow::Result<()> {
    let consumer = build_kafka_consumer(cfg)?;
    rdkafka::consumer::Consumer::subscribe(&consumer, &[cfg.orders_topic.as_str()])?;

    let source = Arc::new(KafkaHandoffSource::new(consumer, cfg.orders_topic.clone()));
    let repo = Arc::new(SqlxOrderRepository::new(db));
    let dlq = Arc::new(KafkaDeadLetterSink::new(dlq_producer, cfg.dlq_topic.clone()));

    let router = Arc::new(ConsumerRouter::new(
        source,
        repo,
        dlq,
        ConsumerConfig {
            batch_size: cfg.batch_size,
            flush_interval_ms: cfg.flush_interval_ms,
            max_retry: cfg.max_retry,
        },
        counters,
    ));

    tokio::spawn(router.run());
    Ok(())
}

/// Starts the timeout reaper (C8) on its own fixed-cadence loop.
fn start_reaper(cfg: &AppConfig, db: Db, store: Arc<RedisStore>, counters: Counters) {
    let ledger = Arc::new(AuditLedger::new(db.clone()));
    let inventory = Arc::new(RedisInventoryEngine::new(store, ledger));
    let repo = Arc::new(SqlxOrderRepository::new(db));

    let reaper = Arc::new(TimeoutReaper::new(repo, inventory, counters));

    tokio::spawn(reaper.run_loop(ReaperConfig {
        scan_interval_ms: cfg.reaper_scan_interval_ms,
        pay_window_seconds: cfg.pay_window_seconds,
        batch_limit: cfg.reaper_batch_limit,
    }));
}

/// Assembles the request pipeline (C9): the single entry point an
/// out-of-scope transport adapter would call for a purchase request.
async fn build_pipeline(
    cfg: &AppConfig,
    db: Db,
    store: Arc<RedisStore>,
    counters: Counters,
) -> anyhow::Result<RequestPipeline> {
    let ledger = Arc::new(AuditLedger::new(db.clone()));
    let inventory = Arc::new(RedisInventoryEngine::new(store.clone(), ledger));
    let activities = Arc::new(SqlxActivityRepository::new(db));
    let risk = Arc::new(RiskAssessor::with_counters(
        store.clone(),
        cfg.risk_thresholds,
        HashSet::new(),
        HashSet::new(),
        counters.clone(),
    ));
    let admission = Arc::new(AdmissionController::new(store));

    let order_producer_client = build_kafka_producer(cfg)?;
    let producer = Arc::new(OrderProducer::new(
        order_producer_client,
        cfg.orders_topic.clone(),
        inventory.clone(),
    ));

    Ok(RequestPipeline::new(
        risk,
        admission,
        activities,
        inventory,
        producer,
        Arc::new(cfg.clone()),
        counters,
    ))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let is_production = std::env::var("APP_ENV").unwrap_or_default() == "production";
    init_tracing(is_production);

    tracing::info!("starting seckill core");

    let cfg = AppConfig::from_env();
    let counters = Counters::default();

    let db = init_db(&cfg).await?;
    let store = Arc::new(RedisStore::connect(&cfg.redis_url).await?);

    let dlq_producer = build_kafka_producer(&cfg)?;
    start_order_consumer(&cfg, db.clone(), dlq_producer, counters.clone())?;
    start_reaper(&cfg, db.clone(), store.clone(), counters.clone());

    // The HTTP/RPC transport that would call `pipeline.handle_purchase` is
    // out of scope (spec §1); constructing it here only proves the wiring
    // is complete and keeps it alive for the lifetime of the process.
    let _pipeline = build_pipeline(&cfg, db, store, counters).await?;

    tracing::info!("seckill core started; waiting for shutdown signal");
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");

    Ok(())
}
