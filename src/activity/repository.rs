use async_trait::async_trait;

use super::model::Activity;

/// Persistence seam for activities (spec §5: "thin repository interface
/// consumed by C7 and C8" generalized to C9's window/limit check).
#[async_trait]
pub trait ActivityRepository: Send + Sync {
    async fn fetch_by_id(&self, id: &str) -> anyhow::Result<Option<Activity>>;

    async fn fetch_by_sku(&self, sku_id: &str) -> anyhow::Result<Option<Activity>>;

    /// CAS transition NOT_STARTED -> IN_PROGRESS; returns true if this call
    /// performed the transition.
    async fn start(&self, id: &str, now_ms: i64) -> anyhow::Result<bool>;

    /// CAS transition IN_PROGRESS -> ENDED; returns true if this call
    /// performed the transition.
    async fn end(&self, id: &str, now_ms: i64) -> anyhow::Result<bool>;
}
