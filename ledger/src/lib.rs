pub mod adapters;
pub mod balance;
pub mod entry;
pub mod error;
pub mod idempotency;
pub mod request;

pub use balance::UserBalance;
pub use entry::{EntryType, LedgerEntry, RewardStatus};
pub use error::LedgerError;
pub use request::{CreditRequest, DebitRequest, MutationOutcome, ReversalRequest};

use async_trait::async_trait;

/// Storage-backed ledger: atomic append-and-update for credit/debit/reverse,
/// plus the read paths the API surface needs. Implementations own the
/// transaction boundary and the per-user row lock.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn init_schema(&self) -> Result<(), LedgerError>;

    async fn credit(
        &self,
        request: &CreditRequest,
        idempotency_key: &str,
    ) -> Result<MutationOutcome, LedgerError>;

    async fn debit(
        &self,
        request: &DebitRequest,
        idempotency_key: &str,
    ) -> Result<MutationOutcome, LedgerError>;

    async fn reverse(
        &self,
        request: &ReversalRequest,
        idempotency_key: &str,
    ) -> Result<MutationOutcome, LedgerError>;

    async fn get_balance(&self, user_id: &str) -> Result<UserBalance, LedgerError>;

    /// Returns entries sorted by `created_at` descending alongside the total
    /// matching count, for pagination.
    async fn get_entries(
        &self,
        user_id: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<LedgerEntry>, i64), LedgerError>;

    async fn get_entry(&self, entry_id: uuid::Uuid) -> Result<LedgerEntry, LedgerError>;
}
