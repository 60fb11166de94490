use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    Credit,
    Debit,
    Reversal,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Credit => "credit",
            Self::Debit => "debit",
            Self::Reversal => "reversal",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "credit" => Some(Self::Credit),
            "debit" => Some(Self::Debit),
            "reversal" => Some(Self::Reversal),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RewardStatus {
    Pending,
    Confirmed,
    Paid,
    Reversed,
}

impl RewardStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Paid => "paid",
            Self::Reversed => "reversed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "confirmed" => Some(Self::Confirmed),
            "paid" => Some(Self::Paid),
            "reversed" => Some(Self::Reversed),
            _ => None,
        }
    }
}

/// Immutable, append-only ledger record. Never updated or deleted after insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub user_id: String,
    pub entry_type: EntryType,
    pub amount_cents: i64,
    pub reward_id: Option<String>,
    pub reward_status: Option<RewardStatus>,
    pub idempotency_key: String,
    pub related_entry_id: Option<Uuid>,
    pub extra_data: Value,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn request_hash(&self) -> Option<&str> {
        self.extra_data.get("request_hash").and_then(Value::as_str)
    }
}

/// Merges `request_hash` plus the caller's own metadata into one JSONB blob,
/// the shape every entry stores under `extra_data`.
pub fn build_extra_data(request_hash: &str, operation: &str, mut caller_data: Map<String, Value>) -> Value {
    caller_data.insert("request_hash".into(), Value::String(request_hash.to_string()));
    caller_data.insert("operation".into(), Value::String(operation.to_string()));
    caller_data.insert("timestamp".into(), Value::String(Utc::now().to_rfc3339()));
    Value::Object(caller_data)
}
