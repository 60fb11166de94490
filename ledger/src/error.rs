use std::fmt;

#[derive(Debug)]
pub enum LedgerError {
    InvalidAmount(String),
    InsufficientFunds { user_id: String, balance_cents: i64, requested_cents: i64 },
    NotFound(String),
    AlreadyReversed(uuid::Uuid),
    IdempotencyConflict(String),
    Storage(String),
}

impl fmt::Display for LedgerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidAmount(msg) => write!(f, "invalid amount: {}", msg),
            Self::InsufficientFunds { user_id, balance_cents, requested_cents } => write!(
                f,
                "insufficient funds for {}: balance {} cents, requested {} cents",
                user_id, balance_cents, requested_cents
            ),
            Self::NotFound(what) => write!(f, "not found: {}", what),
            Self::AlreadyReversed(id) => write!(f, "entry {} already has a reversal", id),
            Self::IdempotencyConflict(key) => {
                write!(f, "idempotency key reused with a different request: {}", key)
            }
            Self::Storage(msg) => write!(f, "storage error: {}", msg),
        }
    }
}

impl std::error::Error for LedgerError {}
