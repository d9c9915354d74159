//! Risk assessor (C3): maps a purchase request to {LOW, MEDIUM, HIGH} /
//! {PASS, CAPTCHA, BLOCK} using a device fingerprint, frequency counters,
//! and a decayed behavioral score (spec §4.3).
//!
//! Fail-open by design: the inventory engine (C5) is the authoritative
//! oversell guard, so a shared-store blip here degrades to PASS rather than
//! a full outage (spec §4.3 error semantics).

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::config::RiskThresholds;
use crate::metrics::Counters;
use crate::store::AtomicStore;
use crate::time::now_ms;

const RISK_PROFILE_TTL_SECS: u64 = 24 * 60 * 60;
const CAPTCHA_TTL_SECS: u64 = 5 * 60;
const DEVICE_FREQ_WINDOW_SECS: u64 = 60;
const DECAY_WINDOW_MS: f64 = 24.0 * 60.0 * 60.0 * 1000.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RiskAction {
    Pass,
    Captcha,
    Block,
}

#[derive(Clone, Debug)]
pub struct RiskOutcome {
    pub level: RiskLevel,
    pub action: RiskAction,
    pub reason: &'static str,
    /// Present only when `action == Captcha`: an opaque handle the client
    /// presents back as `captcha_token` on retry.
    pub challenge: Option<String>,
}

#[derive(Clone, Debug)]
pub struct RiskInput {
    pub user_id: String,
    pub device_id: Option<String>,
    pub source_ip: String,
    pub activity_id: String,
    pub quantity: i64,
    pub captcha_token: Option<String>,
    pub source_channel: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct RiskProfile {
    score: f64,
    last_seen_ms: u64,
    request_count: u64,
}

/// Maps a request to a risk level/action. Holds only configuration and a
/// store handle; all mutable state lives in the shared atomic store (C1).
pub struct RiskAssessor {
    store: Arc<dyn AtomicStore>,
    thresholds: RiskThresholds,
    deny_list_devices: HashSet<String>,
    deny_list_ips: HashSet<String>,
    counters: Counters,
}

impl RiskAssessor {
    pub fn new(
        store: Arc<dyn AtomicStore>,
        thresholds: RiskThresholds,
        deny_list_devices: HashSet<String>,
        deny_list_ips: HashSet<String>,
    ) -> Self {
        Self::with_counters(store, thresholds, deny_list_devices, deny_list_ips, Counters::default())
    }

    pub fn with_counters(
        store: Arc<dyn AtomicStore>,
        thresholds: RiskThresholds,
        deny_list_devices: HashSet<String>,
        deny_list_ips: HashSet<String>,
        counters: Counters,
    ) -> Self {
        Self {
            store,
            thresholds,
            deny_list_devices,
            deny_list_ips,
            counters,
        }
    }

    #[instrument(skip(self, req), target = "risk", fields(user_id = %req.user_id))]
    pub async fn assess(&self, req: &RiskInput) -> RiskOutcome {
        let device_id = match &req.device_id {
            Some(d) if !d.is_empty() => d.clone(),
            _ => {
                return RiskOutcome {
                    level: RiskLevel::High,
                    action: RiskAction::Block,
                    reason: "missing_device_id",
                    challenge: None,
                };
            }
        };

        if self.deny_list_devices.contains(&device_id) || self.deny_list_ips.contains(&req.source_ip)
        {
            return RiskOutcome {
                level: RiskLevel::High,
                action: RiskAction::Block,
                reason: "deny_list",
                challenge: None,
            };
        }

        match self.assess_scored(req, &device_id).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = ?e, device_id = %device_id, "shared store unavailable; failing open");
                self.counters.risk_fail_open.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                RiskOutcome {
                    level: RiskLevel::Low,
                    action: RiskAction::Pass,
                    reason: "store_unavailable_fail_open",
                    challenge: None,
                }
            }
        }
    }

    async fn assess_scored(&self, req: &RiskInput, device_id: &str) -> anyhow::Result<RiskOutcome> {
        let now = now_ms();

        let freq_count = self
            .store
            .incr_device_freq(device_id, DEVICE_FREQ_WINDOW_SECS)
            .await?;
        let freq_subscore = (freq_count as f64 * 4.0).min(60.0);

        let stored = self.load_profile(device_id).await?;
        let (decayed_prior, prior_count) = match &stored {
            Some(p) => {
                let age = now.saturating_sub(p.last_seen_ms) as f64;
                let decay = (1.0 - age / DECAY_WINDOW_MS).clamp(0.0, 1.0);
                (p.score * decay, p.request_count)
            }
            None => (0.0, 0),
        };

        let total_score = (0.6 * decayed_prior + 0.4 * freq_subscore).min(100.0);

        let mut level = if total_score < self.thresholds.t_low {
            RiskLevel::Low
        } else if total_score < self.thresholds.t_high {
            RiskLevel::Medium
        } else {
            RiskLevel::High
        };

        let mut action = match level {
            RiskLevel::Low => RiskAction::Pass,
            RiskLevel::Medium => RiskAction::Captcha,
            RiskLevel::High => RiskAction::Block,
        };

        let mut challenge = None;

        if level == RiskLevel::Medium {
            if let Some(token) = &req.captcha_token {
                // Consumed on any invocation regardless of outcome (spec §9
                // preserves this source behavior as-is).
                let verified = self.verify_and_consume_captcha(&req.user_id, token).await?;
                if verified {
                    level = RiskLevel::Low;
                    action = RiskAction::Pass;
                }
            }

            if action == RiskAction::Captcha {
                let code = Uuid::new_v4().to_string();
                self.store
                    .set_string(&captcha_key(&req.user_id), &code, CAPTCHA_TTL_SECS)
                    .await?;
                challenge = Some(code);
            }
        }

        let profile = RiskProfile {
            score: total_score,
            last_seen_ms: now,
            request_count: prior_count + 1,
        };
        self.store_profile(device_id, &profile).await?;

        let reason = match action {
            RiskAction::Pass => "scored_low",
            RiskAction::Captcha => "scored_medium",
            RiskAction::Block => "scored_high",
        };

        Ok(RiskOutcome {
            level,
            action,
            reason,
            challenge,
        })
    }

    async fn load_profile(&self, device_id: &str) -> anyhow::Result<Option<RiskProfile>> {
        match self.store.get_string(&profile_key(device_id)).await? {
            Some(raw) => Ok(serde_json::from_str(&raw).ok()),
            None => Ok(None),
        }
    }

    async fn store_profile(&self, device_id: &str, profile: &RiskProfile) -> anyhow::Result<()> {
        let raw = serde_json::to_string(profile)?;
        self.store
            .set_string(&profile_key(device_id), &raw, RISK_PROFILE_TTL_SECS)
            .await
    }

    async fn verify_and_consume_captcha(&self, user_id: &str, token: &str) -> anyhow::Result<bool> {
        let key = captcha_key(user_id);
        let stored = self.store.get_string(&key).await?;
        self.store.del(&key).await?;
        Ok(stored.as_deref() == Some(token))
    }
}

fn profile_key(device_id: &str) -> String {
    format!("risk:{device_id}")
}

fn captcha_key(user_id: &str) -> String {
    format!("captcha:{user_id}")
}
