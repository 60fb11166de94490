use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Map;
use uuid::Uuid;

use crate::entry::{build_extra_data, EntryType, LedgerEntry};
use crate::error::LedgerError;
use crate::idempotency::{self, GuardCheck};
use crate::request::{CreditRequest, DebitRequest, MutationOutcome, ReversalRequest};
use crate::{LedgerStore, UserBalance};

#[derive(Default)]
struct MemoryState {
    entries: HashMap<Uuid, LedgerEntry>,
    entries_by_key: HashMap<String, Uuid>,
    reversals_of: HashMap<Uuid, Uuid>,
    balances: HashMap<String, UserBalance>,
}

/// In-memory `LedgerStore`. Holds a single mutex across the whole mutation —
/// the memory equivalent of BEGIN/SELECT FOR UPDATE/COMMIT — so no other task
/// can observe a half-applied credit/debit/reverse.
pub struct MemoryAdapter {
    state: Mutex<MemoryState>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
        }
    }
}

impl Default for MemoryAdapter {
    fn default() -> Self {
        Self::new()
    }
}

fn guard_check(state: &MemoryState, idempotency_key: &str, computed_hash: &str) -> GuardCheck {
    match state.entries_by_key.get(idempotency_key) {
        None => GuardCheck::Fresh,
        Some(id) => {
            let stored_hash = state.entries.get(id).and_then(|e| e.request_hash());
            idempotency::check(stored_hash, computed_hash)
        }
    }
}

#[async_trait]
impl LedgerStore for MemoryAdapter {
    async fn init_schema(&self) -> Result<(), LedgerError> {
        Ok(())
    }

    async fn credit(
        &self,
        request: &CreditRequest,
        idempotency_key: &str,
    ) -> Result<MutationOutcome, LedgerError> {
        request.validate()?;
        let payload = serde_json::json!({
            "user_id": request.user_id,
            "amount_cents": request.amount_cents,
            "reward_id": request.reward_id,
            "reward_status": request.reward_status,
            "extra_data": request.extra_data,
        });
        let computed_hash = idempotency::request_hash(&payload);

        let mut state = self.state.lock().unwrap();
        match guard_check(&state, idempotency_key, &computed_hash) {
            GuardCheck::Duplicate => {
                let id = state.entries_by_key[idempotency_key];
                return Ok(MutationOutcome { entry: state.entries[&id].clone(), is_duplicate: true });
            }
            GuardCheck::Conflict => {
                return Err(LedgerError::IdempotencyConflict(idempotency_key.to_string()));
            }
            GuardCheck::Fresh => {}
        }

        let mut extra = Map::new();
        for (k, v) in payload.as_object().unwrap() {
            extra.insert(k.clone(), v.clone());
        }
        let entry = LedgerEntry {
            id: Uuid::now_v7(),
            user_id: request.user_id.clone(),
            entry_type: EntryType::Credit,
            amount_cents: request.amount_cents,
            reward_id: request.reward_id.clone(),
            reward_status: Some(request.reward_status.unwrap_or(crate::entry::RewardStatus::Pending)),
            idempotency_key: idempotency_key.to_string(),
            related_entry_id: None,
            extra_data: build_extra_data(&computed_hash, "credit", request.extra_data.clone()),
            created_at: Utc::now(),
        };

        let balance = state
            .balances
            .entry(request.user_id.clone())
            .or_insert_with(|| UserBalance::zero(request.user_id.clone()));
        balance.balance_cents += request.amount_cents;
        balance.version += 1;
        balance.updated_at = entry.created_at;

        state.entries_by_key.insert(idempotency_key.to_string(), entry.id);
        state.entries.insert(entry.id, entry.clone());

        metrics::counter!("ledger_mutations_total", "operation" => "credit", "outcome" => "fresh").increment(1);
        tracing::info!(user_id = %request.user_id, amount_cents = request.amount_cents, "credit applied");

        Ok(MutationOutcome { entry, is_duplicate: false })
    }

    async fn debit(
        &self,
        request: &DebitRequest,
        idempotency_key: &str,
    ) -> Result<MutationOutcome, LedgerError> {
        request.validate()?;
        let payload = serde_json::json!({
            "user_id": request.user_id,
            "amount_cents": request.amount_cents,
            "extra_data": request.extra_data,
        });
        let computed_hash = idempotency::request_hash(&payload);

        let mut state = self.state.lock().unwrap();
        match guard_check(&state, idempotency_key, &computed_hash) {
            GuardCheck::Duplicate => {
                let id = state.entries_by_key[idempotency_key];
                return Ok(MutationOutcome { entry: state.entries[&id].clone(), is_duplicate: true });
            }
            GuardCheck::Conflict => {
                return Err(LedgerError::IdempotencyConflict(idempotency_key.to_string()));
            }
            GuardCheck::Fresh => {}
        }

        let current = state
            .balances
            .get(&request.user_id)
            .map(|b| b.balance_cents)
            .unwrap_or(0);
        if current < request.amount_cents {
            tracing::warn!(user_id = %request.user_id, "debit rejected: insufficient funds");
            metrics::counter!("ledger_mutations_total", "operation" => "debit", "outcome" => "error").increment(1);
            return Err(LedgerError::InsufficientFunds {
                user_id: request.user_id.clone(),
                balance_cents: current,
                requested_cents: request.amount_cents,
            });
        }

        let entry = LedgerEntry {
            id: Uuid::now_v7(),
            user_id: request.user_id.clone(),
            entry_type: EntryType::Debit,
            amount_cents: request.amount_cents,
            reward_id: None,
            reward_status: None,
            idempotency_key: idempotency_key.to_string(),
            related_entry_id: None,
            extra_data: build_extra_data(&computed_hash, "debit", request.extra_data.clone()),
            created_at: Utc::now(),
        };

        let balance = state.balances.get_mut(&request.user_id).unwrap();
        balance.balance_cents -= request.amount_cents;
        balance.version += 1;
        balance.updated_at = entry.created_at;

        state.entries_by_key.insert(idempotency_key.to_string(), entry.id);
        state.entries.insert(entry.id, entry.clone());

        metrics::counter!("ledger_mutations_total", "operation" => "debit", "outcome" => "fresh").increment(1);
        tracing::info!(user_id = %request.user_id, amount_cents = request.amount_cents, "debit applied");

        Ok(MutationOutcome { entry, is_duplicate: false })
    }

    async fn reverse(
        &self,
        request: &ReversalRequest,
        idempotency_key: &str,
    ) -> Result<MutationOutcome, LedgerError> {
        request.validate()?;
        let payload = serde_json::json!({
            "entry_id": request.entry_id,
            "reason": request.reason,
            "extra_data": request.extra_data,
        });
        let computed_hash = idempotency::request_hash(&payload);

        let mut state = self.state.lock().unwrap();
        match guard_check(&state, idempotency_key, &computed_hash) {
            GuardCheck::Duplicate => {
                let id = state.entries_by_key[idempotency_key];
                return Ok(MutationOutcome { entry: state.entries[&id].clone(), is_duplicate: true });
            }
            GuardCheck::Conflict => {
                return Err(LedgerError::IdempotencyConflict(idempotency_key.to_string()));
            }
            GuardCheck::Fresh => {}
        }

        let original = state
            .entries
            .get(&request.entry_id)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(format!("entry {}", request.entry_id)))?;

        if original.entry_type == EntryType::Reversal {
            return Err(LedgerError::AlreadyReversed(original.id));
        }
        if state.reversals_of.contains_key(&original.id) {
            return Err(LedgerError::AlreadyReversed(original.id));
        }

        let offset = match original.entry_type {
            EntryType::Credit => -original.amount_cents,
            EntryType::Debit => original.amount_cents,
            EntryType::Reversal => unreachable!(),
        };

        let current = state
            .balances
            .get(&original.user_id)
            .map(|b| b.balance_cents)
            .unwrap_or(0);
        if current + offset < 0 {
            return Err(LedgerError::InsufficientFunds {
                user_id: original.user_id.clone(),
                balance_cents: current,
                requested_cents: -offset,
            });
        }

        let mut extra = request.extra_data.clone();
        extra.insert("original_entry_id".into(), serde_json::json!(original.id));
        extra.insert("original_entry_type".into(), serde_json::json!(original.entry_type.as_str()));
        extra.insert("reason".into(), serde_json::json!(request.reason));

        let entry = LedgerEntry {
            id: Uuid::now_v7(),
            user_id: original.user_id.clone(),
            entry_type: EntryType::Reversal,
            amount_cents: original.amount_cents,
            reward_id: original.reward_id.clone(),
            reward_status: original.reward_status.is_some().then_some(crate::entry::RewardStatus::Reversed),
            idempotency_key: idempotency_key.to_string(),
            related_entry_id: Some(original.id),
            extra_data: build_extra_data(&computed_hash, "reverse", extra),
            created_at: Utc::now(),
        };

        let balance = state
            .balances
            .entry(original.user_id.clone())
            .or_insert_with(|| UserBalance::zero(original.user_id.clone()));
        balance.balance_cents += offset;
        balance.version += 1;
        balance.updated_at = entry.created_at;

        state.reversals_of.insert(original.id, entry.id);
        state.entries_by_key.insert(idempotency_key.to_string(), entry.id);
        state.entries.insert(entry.id, entry.clone());

        metrics::counter!("ledger_mutations_total", "operation" => "reverse", "outcome" => "fresh").increment(1);
        tracing::info!(entry_id = %original.id, "reversal applied");

        Ok(MutationOutcome { entry, is_duplicate: false })
    }

    async fn get_balance(&self, user_id: &str) -> Result<UserBalance, LedgerError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .balances
            .get(user_id)
            .cloned()
            .unwrap_or_else(|| UserBalance::zero(user_id)))
    }

    async fn get_entries(
        &self,
        user_id: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<LedgerEntry>, i64), LedgerError> {
        let state = self.state.lock().unwrap();
        let mut matching: Vec<LedgerEntry> = state
            .entries
            .values()
            .filter(|e| user_id.is_none_or(|u| e.user_id == u))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let total = matching.len() as i64;
        let page = matching
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect();
        Ok((page, total))
    }

    async fn get_entry(&self, entry_id: Uuid) -> Result<LedgerEntry, LedgerError> {
        let state = self.state.lock().unwrap();
        state
            .entries
            .get(&entry_id)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(format!("entry {entry_id}")))
    }
}
