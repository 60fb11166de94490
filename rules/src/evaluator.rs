use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use ledger::{CreditRequest, LedgerStore};

use crate::model::{Action, Condition, Logic, Rule};

/// Walks a dot-separated path through a JSON object. A missing intermediate
/// or terminal key yields `None` rather than an error — conditions treat a
/// missing field as simply not matching.
fn resolve_field<'a>(event_data: &'a Value, field_path: &str) -> Option<&'a Value> {
    let mut current = event_data;
    for key in field_path.split('.') {
        current = current.as_object()?.get(key)?;
    }
    Some(current)
}

fn numbers(actual: &Value, expected: &Value) -> Option<(f64, f64)> {
    Some((actual.as_f64()?, expected.as_f64()?))
}

fn evaluate_condition(condition: &Condition, event_data: &Value) -> bool {
    let actual = resolve_field(event_data, &condition.field);
    let expected = &condition.value;

    match condition.operator.as_str() {
        "==" => actual.is_some_and(|a| a == expected),
        "!=" => actual.is_none_or(|a| a != expected),
        ">" => numbers(actual.unwrap_or(&Value::Null), expected).is_some_and(|(a, e)| a > e),
        "<" => numbers(actual.unwrap_or(&Value::Null), expected).is_some_and(|(a, e)| a < e),
        ">=" => numbers(actual.unwrap_or(&Value::Null), expected).is_some_and(|(a, e)| a >= e),
        "<=" => numbers(actual.unwrap_or(&Value::Null), expected).is_some_and(|(a, e)| a <= e),
        "in" => match (actual, expected.as_array()) {
            (Some(a), Some(list)) => list.contains(a),
            _ => false,
        },
        "not_in" => match (actual, expected.as_array()) {
            (Some(a), Some(list)) => !list.contains(a),
            _ => true,
        },
        "contains" => match actual {
            Some(Value::Array(items)) => items.contains(expected),
            Some(Value::String(s)) => expected.as_str().is_some_and(|needle| s.contains(needle)),
            _ => false,
        },
        _ => false,
    }
}

fn evaluate_conditions(conditions: &[Condition], event_data: &Value, logic: Logic) -> bool {
    if conditions.is_empty() {
        return true;
    }
    let mut results = conditions.iter().map(|c| evaluate_condition(c, event_data));
    match logic {
        Logic::And => results.all(|r| r),
        Logic::Or => results.any(|r| r),
    }
}

/// Deterministic idempotency key for the rule-engine-to-ledger bridge:
/// replaying the same event reproduces the same key, so the credit applies
/// at most once regardless of how many times evaluation runs.
fn derive_idempotency_key(reward_id: &str, user_id: &str, event_id: &str) -> Uuid {
    let name = format!("{reward_id}:{user_id}:{event_id}");
    Uuid::new_v5(&Uuid::NAMESPACE_DNS, name.as_bytes())
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ActionResult {
    Success { success: bool, action_type: String, entry_id: Uuid, user_id: String, amount_cents: i64, is_duplicate: bool },
    Failure { success: bool, error: String },
}

impl ActionResult {
    fn ok(action_type: &str, entry_id: Uuid, user_id: String, amount_cents: i64, is_duplicate: bool) -> Self {
        Self::Success { success: true, action_type: action_type.to_string(), entry_id, user_id, amount_cents, is_duplicate }
    }

    fn err(error: impl Into<String>) -> Self {
        Self::Failure { success: false, error: error.into() }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RuleResult {
    pub rule_id: Uuid,
    pub rule_name: String,
    pub conditions_met: bool,
    pub actions_executed: Vec<ActionResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvaluationResult {
    pub event_data: Value,
    pub rules_evaluated: usize,
    pub rules_triggered: usize,
    pub results: Vec<RuleResult>,
}

async fn execute_action(action: &Action, event_data: &Value, ledger: &dyn LedgerStore) -> ActionResult {
    if action.action_type != "credit" {
        tracing::warn!(action_type = %action.action_type, "action type not implemented");
        return ActionResult::err(format!("action type '{}' is not implemented", action.action_type));
    }

    let user_id = match resolve_field(event_data, &action.user).and_then(Value::as_str) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => {
            tracing::warn!(user_field = %action.user, "action user field not found in event data");
            return ActionResult::err(format!("user field '{}' not found in event data", action.user));
        }
    };

    let event_id = event_data.get("event_id").and_then(Value::as_str).unwrap_or("");
    let idempotency_key = derive_idempotency_key(&action.reward_id, &user_id, event_id);

    let mut extra_data = serde_json::Map::new();
    extra_data.insert("source".into(), Value::String("rule_engine".into()));
    extra_data.insert("action".into(), serde_json::json!(action));
    extra_data.insert("event_data".into(), event_data.clone());

    let request = CreditRequest {
        user_id: user_id.clone(),
        amount_cents: action.amount_cents,
        reward_id: Some(action.reward_id.clone()),
        reward_status: Some(ledger::RewardStatus::Confirmed),
        extra_data,
    };

    match ledger.credit(&request, &idempotency_key.to_string()).await {
        Ok(outcome) => ActionResult::ok("credit", outcome.entry.id, user_id, action.amount_cents, outcome.is_duplicate),
        Err(e) => ActionResult::err(e.to_string()),
    }
}

pub async fn evaluate_event(rules: &[Rule], event_data: Value, ledger: &dyn LedgerStore) -> EvaluationResult {
    let mut results = Vec::with_capacity(rules.len());
    let mut triggered = 0;

    for rule in rules {
        let conditions_met = evaluate_conditions(&rule.rule_json.conditions, &event_data, rule.rule_json.logic);

        let actions_executed = if conditions_met {
            triggered += 1;
            let mut actions = Vec::with_capacity(rule.rule_json.actions.len());
            for action in &rule.rule_json.actions {
                actions.push(execute_action(action, &event_data, ledger).await);
            }
            actions
        } else {
            Vec::new()
        };

        results.push(RuleResult {
            rule_id: rule.id,
            rule_name: rule.name.clone(),
            conditions_met,
            actions_executed,
        });
    }

    tracing::info!(rules_evaluated = results.len(), rules_triggered = triggered, "event evaluated");

    EvaluationResult {
        rules_evaluated: results.len(),
        rules_triggered: triggered,
        event_data,
        results,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger::adapters::MemoryAdapter;
    use crate::model::{Action, Condition, Logic, RuleDefinition};
    use chrono::Utc;

    fn paid_user_rule() -> Rule {
        Rule {
            id: Uuid::new_v4(),
            name: "Paid User Referral Bonus".into(),
            description: None,
            rule_json: RuleDefinition {
                conditions: vec![
                    Condition { field: "referrer.is_paid_user".into(), operator: "==".into(), value: serde_json::json!(true) },
                    Condition { field: "referred.subscription_status".into(), operator: "==".into(), value: serde_json::json!("active") },
                ],
                actions: vec![Action {
                    action_type: "credit".into(),
                    user: "referrer_id".into(),
                    amount_cents: 50_000,
                    reward_id: "referral_bonus".into(),
                }],
                logic: Logic::And,
            },
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn matching_event_triggers_credit() {
        let ledger = MemoryAdapter::new();
        let rule = paid_user_rule();
        let event = serde_json::json!({
            "event_id": "e1",
            "referrer_id": "u4",
            "referrer": {"is_paid_user": true},
            "referred": {"subscription_status": "active"},
        });

        let result = evaluate_event(&[rule], event, &ledger).await;
        assert_eq!(result.rules_triggered, 1);
        assert_eq!(ledger.get_balance("u4").await.unwrap().balance_cents, 50_000);
    }

    #[tokio::test]
    async fn replaying_same_event_is_idempotent() {
        let ledger = MemoryAdapter::new();
        let rule = paid_user_rule();
        let event = serde_json::json!({
            "event_id": "e1",
            "referrer_id": "u4",
            "referrer": {"is_paid_user": true},
            "referred": {"subscription_status": "active"},
        });

        evaluate_event(&[rule.clone()], event.clone(), &ledger).await;
        let second = evaluate_event(&[rule], event, &ledger).await;

        assert_eq!(ledger.get_balance("u4").await.unwrap().balance_cents, 50_000);
        match &second.results[0].actions_executed[0] {
            ActionResult::Success { is_duplicate, .. } => assert!(*is_duplicate),
            ActionResult::Failure { error, .. } => panic!("expected success, got {error}"),
        }
    }

    #[tokio::test]
    async fn missing_field_does_not_match() {
        let ledger = MemoryAdapter::new();
        let rule = Rule {
            rule_json: RuleDefinition {
                conditions: vec![Condition {
                    field: "purchase.amount_cents".into(),
                    operator: ">".into(),
                    value: serde_json::json!(100_000),
                }],
                actions: vec![],
                logic: Logic::And,
            },
            ..paid_user_rule()
        };

        let result = evaluate_event(&[rule], serde_json::json!({"event_id": "e2"}), &ledger).await;
        assert_eq!(result.rules_triggered, 0);
    }

    #[tokio::test]
    async fn unknown_action_user_field_records_failure_without_aborting() {
        let ledger = MemoryAdapter::new();
        let mut rule = paid_user_rule();
        rule.rule_json.actions[0].user = "missing_field".into();

        let event = serde_json::json!({
            "event_id": "e3",
            "referrer": {"is_paid_user": true},
            "referred": {"subscription_status": "active"},
        });

        let result = evaluate_event(&[rule], event, &ledger).await;
        assert_eq!(result.rules_triggered, 1);
        match &result.results[0].actions_executed[0] {
            ActionResult::Failure { .. } => {}
            ActionResult::Success { .. } => panic!("expected failure"),
        }
    }
}
