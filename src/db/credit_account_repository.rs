use async_trait::async_trait;
use uuid::Uuid;

use crate::models::credit::CreditAccount;
use crate::models::transaction::CreditTransaction;

#[async_trait]
pub trait CreditAccountRepository: Send + Sync {
    async fn find_account(&self, user_id: Uuid) -> Result<Option<CreditAccount>, sqlx::Error>;

    /// Inserts an empty account; a concurrent insert for the same user is not
    /// an error (first writer wins).
    async fn insert_account(&self, account: &CreditAccount) -> Result<(), sqlx::Error>;

    /// Persists the mutated account and appends `txn` in one transaction,
    /// guarded by the version the caller loaded. Returns false when another
    /// writer advanced the version first; nothing is written in that case.
    async fn commit_mutation(
        &self,
        account: &CreditAccount,
        expected_version: i64,
        txn: &CreditTransaction,
    ) -> Result<bool, sqlx::Error>;

    async fn list_transactions_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<CreditTransaction>, sqlx::Error>;
}
