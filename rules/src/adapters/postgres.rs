use async_trait::async_trait;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::RuleError;
use crate::model::{NewRule, Rule};
use crate::store::RuleStore;

pub struct PostgresRuleStore {
    pool: PgPool,
}

impl PostgresRuleStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn db_err(e: sqlx::Error) -> RuleError {
    RuleError::Storage(e.to_string())
}

fn row_to_rule(row: &sqlx::postgres::PgRow) -> Result<Rule, RuleError> {
    let rule_json: serde_json::Value = row.try_get("rule_json").map_err(db_err)?;
    Ok(Rule {
        id: row.try_get("id").map_err(db_err)?,
        name: row.try_get("name").map_err(db_err)?,
        description: row.try_get("description").map_err(db_err)?,
        rule_json: serde_json::from_value(rule_json)
            .map_err(|e| RuleError::Storage(format!("malformed rule_json in storage: {e}")))?,
        is_active: row.try_get("is_active").map_err(db_err)?,
        created_at: row.try_get("created_at").map_err(db_err)?,
        updated_at: row.try_get("updated_at").map_err(db_err)?,
    })
}

#[async_trait]
impl RuleStore for PostgresRuleStore {
    async fn init_schema(&self) -> Result<(), RuleError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS referral_rules (
                id UUID PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT,
                rule_json JSONB NOT NULL,
                is_active BOOLEAN NOT NULL DEFAULT true,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn create(&self, new_rule: NewRule) -> Result<Rule, RuleError> {
        new_rule.rule_json.validate()?;
        let id = Uuid::new_v4();
        let rule_json = serde_json::to_value(&new_rule.rule_json)
            .map_err(|e| RuleError::InvalidRule(e.to_string()))?;

        let row = sqlx::query(
            r#"
            INSERT INTO referral_rules (id, name, description, rule_json, is_active, created_at, updated_at)
            VALUES ($1, $2, $3, $4, true, now(), now())
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&new_rule.name)
        .bind(&new_rule.description)
        .bind(&rule_json)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        row_to_rule(&row)
    }

    async fn list(&self, active_only: bool) -> Result<Vec<Rule>, RuleError> {
        let rows = sqlx::query(
            "SELECT * FROM referral_rules WHERE ($1 = false OR is_active = true) ORDER BY created_at DESC",
        )
        .bind(active_only)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(row_to_rule).collect()
    }

    async fn get(&self, id: Uuid) -> Result<Rule, RuleError> {
        let row = sqlx::query("SELECT * FROM referral_rules WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        match row {
            Some(row) => row_to_rule(&row),
            None => Err(RuleError::NotFound(id)),
        }
    }
}
