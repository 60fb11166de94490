use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Derived, mutable view of a user's running balance. Owned and updated only
/// by the ledger engine, in lockstep with the entry that caused the change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserBalance {
    pub user_id: String,
    pub balance_cents: i64,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

impl UserBalance {
    pub fn zero(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            balance_cents: 0,
            version: 0,
            updated_at: Utc::now(),
        }
    }

    /// `balance_cents / 100`, computed only here for human-facing responses.
    /// Never used internally for arithmetic.
    pub fn balance_dollars(&self) -> f64 {
        self.balance_cents as f64 / 100.0
    }
}
