use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::RuleError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Logic {
    And,
    Or,
}

impl Default for Logic {
    fn default() -> Self {
        Self::And
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub operator: String,
    pub value: Value,
}

const KNOWN_OPERATORS: &[&str] = &["==", "!=", ">", "<", ">=", "<=", "in", "not_in", "contains"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub action_type: String,
    pub user: String,
    pub amount_cents: i64,
    pub reward_id: String,
}

const KNOWN_ACTION_TYPES: &[&str] = &["credit", "debit"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleDefinition {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub actions: Vec<Action>,
    #[serde(default)]
    pub logic: Logic,
}

impl RuleDefinition {
    /// Fail-fast validation performed once at rule creation, so a bad rule
    /// never silently no-ops during evaluation.
    pub fn validate(&self) -> Result<(), RuleError> {
        for condition in &self.conditions {
            if condition.field.trim().is_empty() {
                return Err(RuleError::InvalidRule("condition field must not be empty".into()));
            }
            if !KNOWN_OPERATORS.contains(&condition.operator.as_str()) {
                return Err(RuleError::InvalidRule(format!(
                    "unknown operator: {}",
                    condition.operator
                )));
            }
        }
        for action in &self.actions {
            if !KNOWN_ACTION_TYPES.contains(&action.action_type.as_str()) {
                return Err(RuleError::InvalidRule(format!(
                    "unknown action type: {}",
                    action.action_type
                )));
            }
            if action.amount_cents <= 0 {
                return Err(RuleError::InvalidRule("action amount_cents must be > 0".into()));
            }
            if action.user.trim().is_empty() {
                return Err(RuleError::InvalidRule("action user field must not be empty".into()));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub rule_json: RuleDefinition,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRule {
    pub name: String,
    pub description: Option<String>,
    pub rule_json: RuleDefinition,
}
