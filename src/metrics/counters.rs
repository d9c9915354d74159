use std::sync::Arc;
use std::sync::atomic::AtomicU64;

/// Minimal in-process counters for operational visibility. Metric exporters
/// are out of scope (spec §1); this struct is the seam an exporter would
/// read from.
#[derive(Clone, Default)]
pub struct Counters {
    // Risk assessor (C3)
    pub risk_pass: Arc<AtomicU64>,
    pub risk_captcha: Arc<AtomicU64>,
    pub risk_block: Arc<AtomicU64>,
    pub risk_fail_open: Arc<AtomicU64>,

    // Admission controller (C4)
    pub admit_acquired: Arc<AtomicU64>,
    pub admit_queued: Arc<AtomicU64>,

    // Inventory engine (C5)
    pub inv_decrement_ok: Arc<AtomicU64>,
    pub inv_sold_out: Arc<AtomicU64>,
    pub inv_invalid: Arc<AtomicU64>,
    pub inv_rollback_ok: Arc<AtomicU64>,

    // Order producer / consumer (C6 / C7)
    pub handoff_sent: Arc<AtomicU64>,
    pub handoff_rollback: Arc<AtomicU64>,
    pub consumer_flush: Arc<AtomicU64>,
    pub consumer_rows_persisted: Arc<AtomicU64>,
    pub consumer_rows_failed: Arc<AtomicU64>,
    pub consumer_dead_lettered: Arc<AtomicU64>,

    // Timeout reaper (C8)
    pub reaper_timed_out: Arc<AtomicU64>,
    pub reaper_rollback_failed: Arc<AtomicU64>,
}
