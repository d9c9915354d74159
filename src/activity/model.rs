/// Lifecycle state of a sale event (spec §3 `Activity`). Monotone:
/// NOT_STARTED → IN_PROGRESS → ENDED.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActivityStatus {
    NotStarted,
    InProgress,
    Ended,
}

impl ActivityStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ActivityStatus::NotStarted => "NOT_STARTED",
            ActivityStatus::InProgress => "IN_PROGRESS",
            ActivityStatus::Ended => "ENDED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "NOT_STARTED" => Some(ActivityStatus::NotStarted),
            "IN_PROGRESS" => Some(ActivityStatus::InProgress),
            "ENDED" => Some(ActivityStatus::Ended),
            _ => None,
        }
    }
}

/// Configuration for one sale event. `remaining_stock` here is the
/// relational shadow of the shared store's hot counter, kept only for
/// administrative reads; C5 never writes through it on the hot path.
#[derive(Clone, Debug)]
pub struct Activity {
    pub id: String,
    pub sku_id: String,
    pub name: String,
    pub total_stock: u64,
    pub remaining_stock: u64,
    pub start_at_ms: i64,
    pub end_at_ms: i64,
    pub per_user_limit: u32,
    pub status: ActivityStatus,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

impl Activity {
    /// Gate A of C9: an admitted request must land inside the activity's
    /// configured sale window.
    pub fn in_window(&self, now_ms: i64) -> bool {
        self.status == ActivityStatus::InProgress
            && now_ms >= self.start_at_ms
            && now_ms < self.end_at_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mk_activity(status: ActivityStatus, start: i64, end: i64) -> Activity {
        Activity {
            id: "act1".into(),
            sku_id: "sku1".into(),
            name: "Flash Sale".into(),
            total_stock: 100,
            remaining_stock: 100,
            start_at_ms: start,
            end_at_ms: end,
            per_user_limit: 2,
            status,
            created_at_ms: 0,
            updated_at_ms: 0,
        }
    }

    #[test]
    fn in_progress_within_window_is_open() {
        let a = mk_activity(ActivityStatus::InProgress, 0, 1000);
        assert!(a.in_window(500));
    }

    #[test]
    fn not_started_never_in_window() {
        let a = mk_activity(ActivityStatus::NotStarted, 0, 1000);
        assert!(!a.in_window(500));
    }

    #[test]
    fn past_end_at_is_out_of_window() {
        let a = mk_activity(ActivityStatus::InProgress, 0, 1000);
        assert!(!a.in_window(1000));
    }

    #[test]
    fn status_round_trips_through_strings() {
        for s in [
            ActivityStatus::NotStarted,
            ActivityStatus::InProgress,
            ActivityStatus::Ended,
        ] {
            assert_eq!(ActivityStatus::parse(s.as_str()), Some(s));
        }
    }
}
