use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The record written to the durable log (C2) after a successful inventory
/// decrement (spec §3 `OrderHandoff`). Exists in C2 iff inventory was
/// decremented and not yet rolled back.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct OrderHandoff {
    pub order_id: Uuid,
    pub user_id: String,
    pub sku_id: String,
    pub quantity: u32,
    pub client_ts_ms: i64,
    pub source_channel: String,
    pub trace_id: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OrderStatus {
    PendingPayment,
    Paid,
    Cancelled,
    Timeout,
}

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::PendingPayment => "PENDING_PAYMENT",
            OrderStatus::Paid => "PAID",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Timeout => "TIMEOUT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING_PAYMENT" => Some(OrderStatus::PendingPayment),
            "PAID" => Some(OrderStatus::Paid),
            "CANCELLED" => Some(OrderStatus::Cancelled),
            "TIMEOUT" => Some(OrderStatus::Timeout),
            _ => None,
        }
    }

    /// Once terminal, status never changes (spec §3 `Order` invariant).
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Paid | OrderStatus::Cancelled | OrderStatus::Timeout)
    }
}

/// System-of-record row (spec §3 `Order`). Inserted by C7 from an
/// `OrderHandoff`; transitioned by the payment subsystem (PAID), by C8
/// (TIMEOUT), or by an explicit user action (CANCELLED).
#[derive(Clone, Debug, PartialEq)]
pub struct Order {
    pub id: Uuid,
    pub user_id: String,
    pub sku_id: String,
    pub quantity: u32,
    pub status: OrderStatus,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeadLetter {
    pub order_id: Uuid,
    pub user_id: String,
    pub sku_id: String,
    pub quantity: u32,
    pub error: String,
    pub retry_count: u32,
    pub source_partition: i32,
    pub source_offset: i64,
}
