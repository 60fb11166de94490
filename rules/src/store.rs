use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::error::RuleError;
use crate::model::{NewRule, Rule};

#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn init_schema(&self) -> Result<(), RuleError>;
    async fn create(&self, rule: NewRule) -> Result<Rule, RuleError>;
    async fn list(&self, active_only: bool) -> Result<Vec<Rule>, RuleError>;
    async fn get(&self, id: Uuid) -> Result<Rule, RuleError>;
}

#[derive(Default)]
pub struct MemoryRuleStore {
    rules: Mutex<HashMap<Uuid, Rule>>,
}

impl MemoryRuleStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RuleStore for MemoryRuleStore {
    async fn init_schema(&self) -> Result<(), RuleError> {
        Ok(())
    }

    async fn create(&self, new_rule: NewRule) -> Result<Rule, RuleError> {
        new_rule.rule_json.validate()?;
        let now = Utc::now();
        let rule = Rule {
            id: Uuid::new_v4(),
            name: new_rule.name,
            description: new_rule.description,
            rule_json: new_rule.rule_json,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        self.rules.lock().unwrap().insert(rule.id, rule.clone());
        Ok(rule)
    }

    async fn list(&self, active_only: bool) -> Result<Vec<Rule>, RuleError> {
        let rules = self.rules.lock().unwrap();
        Ok(rules
            .values()
            .filter(|r| !active_only || r.is_active)
            .cloned()
            .collect())
    }

    async fn get(&self, id: Uuid) -> Result<Rule, RuleError> {
        self.rules
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(RuleError::NotFound(id))
    }
}
