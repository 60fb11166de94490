use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::entry::RewardStatus;
use crate::error::LedgerError;

pub const MAX_AMOUNT_CENTS: i64 = 1_000_000_000;

fn validate_amount(amount_cents: i64) -> Result<(), LedgerError> {
    if amount_cents <= 0 {
        return Err(LedgerError::InvalidAmount("amount_cents must be > 0".into()));
    }
    if amount_cents > MAX_AMOUNT_CENTS {
        return Err(LedgerError::InvalidAmount(format!(
            "amount_cents must be <= {MAX_AMOUNT_CENTS}"
        )));
    }
    Ok(())
}

fn validate_user_id(user_id: &str) -> Result<(), LedgerError> {
    if user_id.is_empty() || user_id.len() > 255 {
        return Err(LedgerError::InvalidAmount(
            "user_id must be between 1 and 255 bytes".into(),
        ));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditRequest {
    pub user_id: String,
    pub amount_cents: i64,
    #[serde(default)]
    pub reward_id: Option<String>,
    #[serde(default)]
    pub reward_status: Option<RewardStatus>,
    #[serde(default)]
    pub extra_data: Map<String, Value>,
}

impl CreditRequest {
    pub fn validate(&self) -> Result<(), LedgerError> {
        validate_user_id(&self.user_id)?;
        validate_amount(self.amount_cents)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebitRequest {
    pub user_id: String,
    pub amount_cents: i64,
    #[serde(default)]
    pub extra_data: Map<String, Value>,
}

impl DebitRequest {
    pub fn validate(&self) -> Result<(), LedgerError> {
        validate_user_id(&self.user_id)?;
        validate_amount(self.amount_cents)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReversalRequest {
    pub entry_id: Uuid,
    pub reason: String,
    #[serde(default)]
    pub extra_data: Map<String, Value>,
}

impl ReversalRequest {
    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.reason.trim().is_empty() {
            return Err(LedgerError::InvalidAmount("reason must not be empty".into()));
        }
        Ok(())
    }
}

/// Outcome of a mutation: the entry that now exists, and whether this call
/// created it or merely discovered a prior identical one.
#[derive(Debug, Clone, Serialize)]
pub struct MutationOutcome {
    pub entry: crate::entry::LedgerEntry,
    pub is_duplicate: bool,
}
