use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::entry::{build_extra_data, EntryType, LedgerEntry, RewardStatus};
use crate::error::LedgerError;
use crate::idempotency;
use crate::request::{CreditRequest, DebitRequest, MutationOutcome, ReversalRequest};
use crate::{LedgerStore, UserBalance};

pub struct PostgresAdapter {
    pool: PgPool,
}

impl PostgresAdapter {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, LedgerError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| LedgerError::Storage(e.to_string()))?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_entry(row: &sqlx::postgres::PgRow) -> Result<LedgerEntry, LedgerError> {
    let entry_type_str: String = row.try_get("entry_type").map_err(db_err)?;
    let reward_status_str: Option<String> = row.try_get("reward_status").map_err(db_err)?;
    Ok(LedgerEntry {
        id: row.try_get("id").map_err(db_err)?,
        user_id: row.try_get("user_id").map_err(db_err)?,
        entry_type: EntryType::from_str(&entry_type_str)
            .ok_or_else(|| LedgerError::Storage(format!("unknown entry_type {entry_type_str}")))?,
        amount_cents: row.try_get("amount_cents").map_err(db_err)?,
        reward_id: row.try_get("reward_id").map_err(db_err)?,
        reward_status: reward_status_str.and_then(|s| RewardStatus::from_str(&s)),
        idempotency_key: row.try_get("idempotency_key").map_err(db_err)?,
        related_entry_id: row.try_get("related_entry_id").map_err(db_err)?,
        extra_data: row.try_get::<Value, _>("extra_data").map_err(db_err)?,
        created_at: row.try_get("created_at").map_err(db_err)?,
    })
}

fn db_err(e: sqlx::Error) -> LedgerError {
    LedgerError::Storage(e.to_string())
}

#[async_trait]
impl LedgerStore for PostgresAdapter {
    async fn init_schema(&self) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ledger_entries (
                id UUID PRIMARY KEY,
                user_id TEXT NOT NULL,
                entry_type TEXT NOT NULL,
                amount_cents BIGINT NOT NULL CHECK (amount_cents > 0),
                reward_id TEXT,
                reward_status TEXT,
                idempotency_key TEXT NOT NULL UNIQUE,
                related_entry_id UUID REFERENCES ledger_entries(id),
                extra_data JSONB NOT NULL DEFAULT '{}'::jsonb,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_user_created ON ledger_entries (user_id, created_at)")
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_reward ON ledger_entries (reward_id, reward_status)")
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS user_balances (
                user_id TEXT PRIMARY KEY,
                balance_cents BIGINT NOT NULL DEFAULT 0 CHECK (balance_cents >= 0),
                version BIGINT NOT NULL DEFAULT 1,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

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

        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query(
            "SELECT user_id FROM user_balances WHERE user_id = $1 FOR UPDATE",
        )
        .bind(&request.user_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?;

        let entry_id = Uuid::now_v7();
        let reward_status = request.reward_status.unwrap_or(RewardStatus::Pending);
        let extra_data = build_extra_data(&computed_hash, "credit", request.extra_data.clone());

        // ON CONFLICT DO NOTHING + RETURNING: when another racing request already
        // claimed this key, the RETURNING row is absent, not an error.
        let inserted: Option<Uuid> = sqlx::query_scalar(
            r#"
            INSERT INTO ledger_entries
                (id, user_id, entry_type, amount_cents, reward_id, reward_status, idempotency_key, related_entry_id, extra_data)
            VALUES ($1, $2, 'credit', $3, $4, $5, $6, NULL, $7)
            ON CONFLICT (idempotency_key) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(entry_id)
        .bind(&request.user_id)
        .bind(request.amount_cents)
        .bind(&request.reward_id)
        .bind(reward_status.as_str())
        .bind(idempotency_key)
        .bind(&extra_data)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?;

        if inserted.is_none() {
            tx.rollback().await.map_err(db_err)?;
            return self.resolve_duplicate(idempotency_key, &computed_hash).await;
        }

        sqlx::query(
            r#"
            INSERT INTO user_balances (user_id, balance_cents, version, updated_at)
            VALUES ($1, $2, 1, now())
            ON CONFLICT (user_id) DO UPDATE SET
                balance_cents = user_balances.balance_cents + EXCLUDED.balance_cents,
                version = user_balances.version + 1,
                updated_at = now()
            "#,
        )
        .bind(&request.user_id)
        .bind(request.amount_cents)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        let row = sqlx::query("SELECT * FROM ledger_entries WHERE id = $1")
            .bind(entry_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_err)?;
        let entry = row_to_entry(&row)?;

        tx.commit().await.map_err(db_err)?;

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

        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let current_row = sqlx::query(
            "SELECT balance_cents FROM user_balances WHERE user_id = $1 FOR UPDATE",
        )
        .bind(&request.user_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?;
        let current: i64 = current_row.as_ref().map(|r| r.get("balance_cents")).unwrap_or(0);

        if current < request.amount_cents {
            tx.rollback().await.map_err(db_err)?;
            tracing::warn!(user_id = %request.user_id, "debit rejected: insufficient funds");
            metrics::counter!("ledger_mutations_total", "operation" => "debit", "outcome" => "error").increment(1);
            return Err(LedgerError::InsufficientFunds {
                user_id: request.user_id.clone(),
                balance_cents: current,
                requested_cents: request.amount_cents,
            });
        }

        let entry_id = Uuid::now_v7();
        let extra_data = build_extra_data(&computed_hash, "debit", request.extra_data.clone());

        let inserted: Option<Uuid> = sqlx::query_scalar(
            r#"
            INSERT INTO ledger_entries
                (id, user_id, entry_type, amount_cents, idempotency_key, related_entry_id, extra_data)
            VALUES ($1, $2, 'debit', $3, $4, NULL, $5)
            ON CONFLICT (idempotency_key) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(entry_id)
        .bind(&request.user_id)
        .bind(request.amount_cents)
        .bind(idempotency_key)
        .bind(&extra_data)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?;

        if inserted.is_none() {
            tx.rollback().await.map_err(db_err)?;
            return self.resolve_duplicate(idempotency_key, &computed_hash).await;
        }

        sqlx::query(
            "UPDATE user_balances SET balance_cents = balance_cents - $2, version = version + 1, updated_at = now() WHERE user_id = $1",
        )
        .bind(&request.user_id)
        .bind(request.amount_cents)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        let row = sqlx::query("SELECT * FROM ledger_entries WHERE id = $1")
            .bind(entry_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_err)?;
        let entry = row_to_entry(&row)?;

        tx.commit().await.map_err(db_err)?;

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

        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let original_row = sqlx::query("SELECT * FROM ledger_entries WHERE id = $1")
            .bind(request.entry_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?;
        let original_row = match original_row {
            Some(r) => r,
            None => {
                tx.rollback().await.map_err(db_err)?;
                return Err(LedgerError::NotFound(format!("entry {}", request.entry_id)));
            }
        };
        let original = row_to_entry(&original_row)?;

        if original.entry_type == EntryType::Reversal {
            tx.rollback().await.map_err(db_err)?;
            return Err(LedgerError::AlreadyReversed(original.id));
        }

        let already: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM ledger_entries WHERE related_entry_id = $1")
                .bind(original.id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(db_err)?;
        if already.is_some() {
            tx.rollback().await.map_err(db_err)?;
            return Err(LedgerError::AlreadyReversed(original.id));
        }

        sqlx::query("SELECT balance_cents FROM user_balances WHERE user_id = $1 FOR UPDATE")
            .bind(&original.user_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?;

        let offset = match original.entry_type {
            EntryType::Credit => -original.amount_cents,
            EntryType::Debit => original.amount_cents,
            EntryType::Reversal => unreachable!(),
        };

        let current: i64 = sqlx::query_scalar("SELECT balance_cents FROM user_balances WHERE user_id = $1")
            .bind(&original.user_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?
            .unwrap_or(0);
        if current + offset < 0 {
            tx.rollback().await.map_err(db_err)?;
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
        let extra_data = build_extra_data(&computed_hash, "reverse", extra);

        let entry_id = Uuid::now_v7();
        let reward_status = original.reward_status.is_some().then_some(RewardStatus::Reversed);

        let inserted: Option<Uuid> = sqlx::query_scalar(
            r#"
            INSERT INTO ledger_entries
                (id, user_id, entry_type, amount_cents, reward_id, reward_status, idempotency_key, related_entry_id, extra_data)
            VALUES ($1, $2, 'reversal', $3, $4, $5, $6, $7, $8)
            ON CONFLICT (idempotency_key) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(entry_id)
        .bind(&original.user_id)
        .bind(original.amount_cents)
        .bind(&original.reward_id)
        .bind(reward_status.map(|s| s.as_str()))
        .bind(idempotency_key)
        .bind(original.id)
        .bind(&extra_data)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?;

        if inserted.is_none() {
            tx.rollback().await.map_err(db_err)?;
            return self.resolve_duplicate(idempotency_key, &computed_hash).await;
        }

        sqlx::query(
            "UPDATE user_balances SET balance_cents = balance_cents + $2, version = version + 1, updated_at = now() WHERE user_id = $1",
        )
        .bind(&original.user_id)
        .bind(offset)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        let row = sqlx::query("SELECT * FROM ledger_entries WHERE id = $1")
            .bind(entry_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_err)?;
        let entry = row_to_entry(&row)?;

        tx.commit().await.map_err(db_err)?;

        metrics::counter!("ledger_mutations_total", "operation" => "reverse", "outcome" => "fresh").increment(1);
        tracing::info!(entry_id = %original.id, "reversal applied");

        Ok(MutationOutcome { entry, is_duplicate: false })
    }

    async fn get_balance(&self, user_id: &str) -> Result<UserBalance, LedgerError> {
        let row = sqlx::query("SELECT user_id, balance_cents, version, updated_at FROM user_balances WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        match row {
            Some(row) => Ok(UserBalance {
                user_id: row.try_get("user_id").map_err(db_err)?,
                balance_cents: row.try_get("balance_cents").map_err(db_err)?,
                version: row.try_get("version").map_err(db_err)?,
                updated_at: row.try_get("updated_at").map_err(db_err)?,
            }),
            None => Ok(UserBalance::zero(user_id)),
        }
    }

    async fn get_entries(
        &self,
        user_id: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<LedgerEntry>, i64), LedgerError> {
        let limit = limit.clamp(1, 1000);
        let offset = offset.max(0);

        let rows = sqlx::query(
            "SELECT * FROM ledger_entries WHERE ($1::text IS NULL OR user_id = $1) ORDER BY created_at DESC LIMIT $2 OFFSET $3",
        )
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let entries = rows.iter().map(row_to_entry).collect::<Result<Vec<_>, _>>()?;

        let total: i64 = sqlx::query_scalar(
            "SELECT count(*) FROM ledger_entries WHERE ($1::text IS NULL OR user_id = $1)",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        Ok((entries, total))
    }

    async fn get_entry(&self, entry_id: Uuid) -> Result<LedgerEntry, LedgerError> {
        let row = sqlx::query("SELECT * FROM ledger_entries WHERE id = $1")
            .bind(entry_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        match row {
            Some(row) => row_to_entry(&row),
            None => Err(LedgerError::NotFound(format!("entry {entry_id}"))),
        }
    }
}

impl PostgresAdapter {
    /// Re-reads the entry that won the idempotency-key race after our own
    /// insert missed the RETURNING row, mirroring the record-then-recheck
    /// pattern the same race resolves with on the in-memory adapter.
    async fn resolve_duplicate(
        &self,
        idempotency_key: &str,
        computed_hash: &str,
    ) -> Result<MutationOutcome, LedgerError> {
        let row = sqlx::query("SELECT * FROM ledger_entries WHERE idempotency_key = $1")
            .bind(idempotency_key)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        let row = row.ok_or_else(|| {
            LedgerError::Storage("idempotency conflict resolution found no entry".into())
        })?;
        let entry = row_to_entry(&row)?;

        if entry.request_hash() != Some(computed_hash) {
            return Err(LedgerError::IdempotencyConflict(idempotency_key.to_string()));
        }

        metrics::counter!("ledger_mutations_total", "outcome" => "duplicate").increment(1);
        Ok(MutationOutcome { entry, is_duplicate: true })
    }
}
