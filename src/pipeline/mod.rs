//! Request pipeline (C9): orchestrates C3 → C4 → activity window/limit →
//! C5 → C6 for a single purchase request and translates the terminal state
//! onto the response codes in spec §6 (spec §4.9).

use std::sync::Arc;

use tracing::{instrument, warn};
use uuid::Uuid;

use crate::activity::model::ActivityStatus;
use crate::activity::repository::ActivityRepository;
use crate::admission::{Admission, AdmissionController};
use crate::config::AppConfig;
use crate::inventory::InventoryEngine;
use crate::inventory::types::DecrementResult;
use crate::metrics::Counters;
use crate::order::model::OrderHandoff;
use crate::order::producer::HandoffProducer;
use crate::risk::{RiskAction, RiskAssessor, RiskInput};
use crate::time::now_ms;

#[derive(Clone, Debug)]
pub struct PurchaseRequest {
    pub user_id: String,
    pub device_id: Option<String>,
    pub source_ip: String,
    pub sku_id: String,
    pub quantity: u32,
    pub captcha_token: Option<String>,
    pub source_channel: String,
    pub trace_id: String,
}

/// Terminal outputs, mapped 1:1 onto spec §6's response codes. `OutOfWindow`
/// has no numeric code in spec §6's table (an Open Question the
/// distillation left unresolved, see DESIGN.md): this crate surfaces it as
/// 409, reusing the `OUT_OF_WINDOW` error kind from spec §7 with its own
/// code rather than overloading `LimitExceeded`'s 422.
#[derive(Clone, Debug, PartialEq)]
pub enum PurchaseResponse {
    /// 200
    Confirmed { order_id: Uuid, remaining: u64 },
    /// 202
    Queued { token: String, eta_seconds: f64 },
    /// 403
    Blocked { reason: String },
    /// 410
    SoldOut,
    /// 422
    LimitExceeded,
    /// 409 (see doc comment above)
    OutOfWindow,
    /// 423
    CaptchaRequired { challenge: String },
    /// 503
    SystemBusy,
}

impl PurchaseResponse {
    pub fn response_code(&self) -> u16 {
        match self {
            PurchaseResponse::Confirmed { .. } => 200,
            PurchaseResponse::Queued { .. } => 202,
            PurchaseResponse::Blocked { .. } => 403,
            PurchaseResponse::SoldOut => 410,
            PurchaseResponse::LimitExceeded => 422,
            PurchaseResponse::OutOfWindow => 409,
            PurchaseResponse::CaptchaRequired { .. } => 423,
            PurchaseResponse::SystemBusy => 503,
        }
    }
}

pub struct RequestPipeline {
    risk: Arc<RiskAssessor>,
    admission: Arc<AdmissionController>,
    activities: Arc<dyn ActivityRepository>,
    inventory: Arc<dyn InventoryEngine>,
    producer: Arc<dyn HandoffProducer>,
    config: Arc<AppConfig>,
    counters: Counters,
}

impl RequestPipeline {
    pub fn new(
        risk: Arc<RiskAssessor>,
        admission: Arc<AdmissionController>,
        activities: Arc<dyn ActivityRepository>,
        inventory: Arc<dyn InventoryEngine>,
        producer: Arc<dyn HandoffProducer>,
        config: Arc<AppConfig>,
        counters: Counters,
    ) -> Self {
        Self {
            risk,
            admission,
            activities,
            inventory,
            producer,
            config,
            counters,
        }
    }

    #[instrument(skip(self, req), target = "pipeline", fields(user_id = %req.user_id, sku_id = %req.sku_id))]
    pub async fn handle_purchase(&self, req: PurchaseRequest) -> PurchaseResponse {
        if req.quantity == 0 {
            return PurchaseResponse::LimitExceeded;
        }

        // RECEIVED --assess--> BLOCKED | CHALLENGED | ADMITTED_CANDIDATE
        let risk_outcome = self
            .risk
            .assess(&RiskInput {
                user_id: req.user_id.clone(),
                device_id: req.device_id.clone(),
                source_ip: req.source_ip.clone(),
                activity_id: req.sku_id.clone(),
                quantity: req.quantity as i64,
                captcha_token: req.captcha_token.clone(),
                source_channel: req.source_channel.clone(),
            })
            .await;

        match risk_outcome.action {
            RiskAction::Block => {
                self.counters.risk_block.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                return PurchaseResponse::Blocked {
                    reason: risk_outcome.reason.to_string(),
                };
            }
            RiskAction::Captcha => {
                self.counters.risk_captcha.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                return PurchaseResponse::CaptchaRequired {
                    challenge: risk_outcome.challenge.unwrap_or_default(),
                };
            }
            RiskAction::Pass => {
                self.counters.risk_pass.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            }
        }

        // ADMITTED_CANDIDATE --acquire--> QUEUED | ADMITTED
        let bucket = self.config.bucket_for(&req.sku_id);
        let admission = match self.admission.acquire(&req.sku_id, bucket, now_ms()).await {
            Ok(a) => a,
            Err(e) => {
                warn!(error = ?e, "admission controller unavailable");
                return PurchaseResponse::SystemBusy;
            }
        };

        match admission {
            Admission::Queued { token, eta_seconds } => {
                self.counters.admit_queued.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                return PurchaseResponse::Queued { token, eta_seconds };
            }
            Admission::Acquired => {
                self.counters.admit_acquired.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            }
        }

        // ADMITTED --window/limit check--> OUT_OF_WINDOW | LIMIT_EXCEEDED | PROCEED
        let activity = match self.activities.fetch_by_sku(&req.sku_id).await {
            Ok(Some(a)) => a,
            Ok(None) => return PurchaseResponse::OutOfWindow,
            Err(e) => {
                warn!(error = ?e, "activity repository unavailable");
                return PurchaseResponse::SystemBusy;
            }
        };

        if activity.status != ActivityStatus::InProgress || !activity.in_window(now_ms() as i64) {
            return PurchaseResponse::OutOfWindow;
        }

        // PROCEED --decrement--> SOLD_OUT | SYSTEM_BUSY | RESERVED
        //
        // The per-user purchase-limit check is folded into the decrement
        // script per spec §9's Open Question resolution, so it is enforced
        // atomically with the stock check rather than as a separate,
        // racy round trip here.
        let decrement = match self
            .inventory
            .decrement(&req.sku_id, &req.user_id, req.quantity, activity.per_user_limit)
            .await
        {
            Ok(d) => d,
            Err(e) => {
                warn!(error = ?e, "inventory engine unavailable");
                return PurchaseResponse::SystemBusy;
            }
        };

        let (order_id, remaining) = match decrement {
            DecrementResult::Invalid => return PurchaseResponse::LimitExceeded,
            DecrementResult::SoldOut => {
                self.counters.inv_sold_out.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                return PurchaseResponse::SoldOut;
            }
            DecrementResult::LimitExceeded => return PurchaseResponse::LimitExceeded,
            DecrementResult::Ok { remaining, order_id } => {
                self.counters.inv_decrement_ok.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                (order_id, remaining)
            }
        };

        // RESERVED --handoff--> SYSTEM_BUSY(rollback) | CONFIRMED
        let handoff = OrderHandoff {
            order_id,
            user_id: req.user_id.clone(),
            sku_id: req.sku_id.clone(),
            quantity: req.quantity,
            client_ts_ms: now_ms() as i64,
            source_channel: req.source_channel.clone(),
            trace_id: req.trace_id.clone(),
        };

        match self.producer.handoff(handoff).await {
            Ok(()) => {
                self.counters.handoff_sent.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                PurchaseResponse::Confirmed { order_id, remaining }
            }
            Err(_) => {
                // OrderProducer already attempted a compensating rollback
                // before returning (spec §4.6).
                self.counters.handoff_rollback.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                PurchaseResponse::SystemBusy
            }
        }
    }
}
