//! Admission controller (C4): a per-sku token bucket (spec §4.4) that sheds
//! or queues load before it ever reaches the inventory engine.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use tracing::instrument;

use crate::config::BucketParams;
use crate::store::{AtomicStore, BucketOutcome};

#[derive(Clone, Debug, PartialEq)]
pub enum Admission {
    Acquired,
    Queued { token: String, eta_seconds: f64 },
}

pub struct AdmissionController {
    store: Arc<dyn AtomicStore>,
}

impl AdmissionController {
    pub fn new(store: Arc<dyn AtomicStore>) -> Self {
        Self { store }
    }

    #[instrument(skip(self, params), target = "admission", fields(sku_id = %sku_id))]
    pub async fn acquire(
        &self,
        sku_id: &str,
        params: BucketParams,
        now_ms: u64,
    ) -> anyhow::Result<Admission> {
        let outcome = self
            .store
            .token_bucket(sku_id, params.capacity, params.refill_rate, now_ms)
            .await?;

        Ok(match outcome {
            BucketOutcome::Acquired => Admission::Acquired,
            BucketOutcome::Denied { tokens_remaining } => {
                let eta_seconds = if params.refill_rate > 0.0 {
                    ((1.0 - tokens_remaining).max(0.0)) / params.refill_rate
                } else {
                    f64::INFINITY
                };
                Admission::Queued {
                    token: opaque_token(sku_id, now_ms),
                    eta_seconds,
                }
            }
        })
    }
}

/// The token carries no semantics beyond "retry later": it is not looked up
/// anywhere, only round-tripped back to the client (spec §4.4 leaves queue
/// placement unspecified beyond "an opaque retry handle").
fn opaque_token(sku_id: &str, now_ms: u64) -> String {
    let raw = format!("{sku_id}:{now_ms}");
    URL_SAFE_NO_PAD.encode(raw)
}
