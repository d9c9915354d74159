use thiserror::Error;

/// Stable error taxonomy surfaced across the admission/inventory pipeline.
///
/// Variants map 1:1 onto the response codes the request pipeline (C9)
/// translates at the boundary; infrastructure failures are normalized into
/// `Infra` before being classified by the caller (the inventory engine
/// always classifies as `SystemBusy` — it never fails open).
#[derive(Error, Debug)]
pub enum AppError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("activity not in its purchase window")]
    OutOfWindow,

    #[error("sold out")]
    SoldOut,

    #[error("per-user purchase limit exceeded")]
    LimitExceeded,

    #[error("blocked: {0}")]
    Blocked(String),

    #[error("captcha challenge required")]
    CaptchaRequired { challenge: String },

    #[error("system busy")]
    SystemBusy,

    #[error("persistence failed after retries: {0}")]
    PersistenceFailed(String),

    #[error("reconciliation drift detected: {0}")]
    ReconciliationDrift(String),

    #[error("infrastructure error: {0}")]
    Infra(String),
}

impl From<anyhow::Error> for AppError {
    /// Any uncatalogued infrastructure failure (shared-store, Kafka, DB
    /// transport) is normalized here; callers on the inventory/admission
    /// path always surface this as `SystemBusy` rather than propagating the
    /// raw transport error to a client.
    fn from(e: anyhow::Error) -> Self {
        AppError::Infra(e.to_string())
    }
}
