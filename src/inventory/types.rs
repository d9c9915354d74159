use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecrementResult {
    Ok { remaining: u64, order_id: Uuid },
    SoldOut,
    Invalid,
    LimitExceeded,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RollbackResult {
    Ok { new_stock: u64 },
    Invalid,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReadResult {
    pub total: u64,
    pub remaining: u64,
    pub sold: u64,
}
