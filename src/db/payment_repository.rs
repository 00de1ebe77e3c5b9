use async_trait::async_trait;
use time::OffsetDateTime;

use crate::models::credit::CreditAccount;
use crate::models::payment::PaymentRecord;
use crate::models::transaction::CreditTransaction;

/// Result of the atomic claim-and-grant step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantCommit {
    /// Record transitioned to completed/approved and the account mutation
    /// plus ledger entry were written.
    Applied,
    /// The record was already terminal; another settler won the claim.
    RecordTerminal,
    /// The account version moved underneath us; caller reloads and retries.
    AccountConflict,
}

#[async_trait]
pub trait PaymentRepository: Send + Sync {
    async fn insert_record(&self, record: &PaymentRecord) -> Result<(), sqlx::Error>;

    async fn find_by_order_id(&self, order_id: &str)
        -> Result<Option<PaymentRecord>, sqlx::Error>;

    async fn find_by_invoice_id(
        &self,
        invoice_id: &str,
    ) -> Result<Option<PaymentRecord>, sqlx::Error>;

    /// Sets the invoice id iff none is bound yet; the global unique index on
    /// invoice_id is the backstop against cross-order reuse. Returns the
    /// binding stored after the call.
    async fn bind_invoice(
        &self,
        order_id: &str,
        invoice_id: &str,
        now: OffsetDateTime,
    ) -> Result<Option<String>, sqlx::Error>;

    /// pending -> processing claim marker; no-op for any other state.
    async fn mark_processing(&self, order_id: &str, now: OffsetDateTime)
        -> Result<(), sqlx::Error>;

    /// Terminal failure: failed/rejected with an auditable reason. Only
    /// non-terminal records transition.
    async fn mark_rejected(
        &self,
        order_id: &str,
        reason: &str,
        now: OffsetDateTime,
    ) -> Result<(), sqlx::Error>;

    /// Stores the webhook-advertised charge. Advisory only; settlement trusts
    /// the verifier exclusively.
    async fn record_advisory_charge(
        &self,
        order_id: &str,
        charged_amount: f64,
        now: OffsetDateTime,
    ) -> Result<(), sqlx::Error>;

    /// The credit-granting step. Within one transaction: transition the
    /// record from a non-terminal state to completed/approved storing the
    /// verified amount, apply the account mutation guarded by
    /// `expected_version`, and append the purchase transaction. Either all
    /// three commit or none do.
    async fn complete_with_grant(
        &self,
        order_id: &str,
        verified_amount: f64,
        account: &CreditAccount,
        expected_version: i64,
        txn: &CreditTransaction,
        now: OffsetDateTime,
    ) -> Result<GrantCommit, sqlx::Error>;
}
