use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::db::credit_account_repository::CreditAccountRepository;
use crate::db::payment_repository::{GrantCommit, PaymentRepository};
use crate::models::credit::CreditAccount;
use crate::models::payment::{ApprovalStatus, PaymentRecord, PaymentStatus};
use crate::models::transaction::CreditTransaction;

#[derive(Default)]
struct MockState {
    accounts: HashMap<Uuid, CreditAccount>,
    transactions: Vec<CreditTransaction>,
    payments: HashMap<String, PaymentRecord>,
}

/// In-memory store for tests. Everything shares a single lock so the
/// compare-and-swap and claim-token semantics behave like the Postgres
/// transactions they stand in for.
#[derive(Default)]
pub struct MockDb {
    state: Mutex<MockState>,
    pub should_fail: Mutex<bool>,
    /// Makes the next N commit_mutation calls lose the version race, for
    /// exercising the bounded-retry path.
    pub forced_version_conflicts: Mutex<u32>,
}

impl MockDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_account(&self, account: CreditAccount) {
        self.state
            .lock()
            .unwrap()
            .accounts
            .insert(account.user_id, account);
    }

    pub fn seed_payment(&self, record: PaymentRecord) {
        self.state
            .lock()
            .unwrap()
            .payments
            .insert(record.order_id.clone(), record);
    }

    pub fn account(&self, user_id: Uuid) -> Option<CreditAccount> {
        self.state.lock().unwrap().accounts.get(&user_id).cloned()
    }

    pub fn payment(&self, order_id: &str) -> Option<PaymentRecord> {
        self.state.lock().unwrap().payments.get(order_id).cloned()
    }

    pub fn transactions(&self) -> Vec<CreditTransaction> {
        self.state.lock().unwrap().transactions.clone()
    }

    fn maybe_fail(&self) -> Result<(), sqlx::Error> {
        if *self.should_fail.lock().unwrap() {
            return Err(sqlx::Error::Protocol("Mock DB failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl CreditAccountRepository for MockDb {
    async fn find_account(&self, user_id: Uuid) -> Result<Option<CreditAccount>, sqlx::Error> {
        self.maybe_fail()?;
        Ok(self.state.lock().unwrap().accounts.get(&user_id).cloned())
    }

    async fn insert_account(&self, account: &CreditAccount) -> Result<(), sqlx::Error> {
        self.maybe_fail()?;
        let mut state = self.state.lock().unwrap();
        state
            .accounts
            .entry(account.user_id)
            .or_insert_with(|| account.clone());
        Ok(())
    }

    async fn commit_mutation(
        &self,
        account: &CreditAccount,
        expected_version: i64,
        txn: &CreditTransaction,
    ) -> Result<bool, sqlx::Error> {
        self.maybe_fail()?;

        {
            let mut forced = self.forced_version_conflicts.lock().unwrap();
            if *forced > 0 {
                *forced -= 1;
                return Ok(false);
            }
        }

        let mut state = self.state.lock().unwrap();
        let Some(stored) = state.accounts.get_mut(&account.user_id) else {
            return Ok(false);
        };
        if stored.version != expected_version {
            return Ok(false);
        }

        *stored = account.clone();
        stored.version = expected_version + 1;
        state.transactions.push(txn.clone());
        Ok(true)
    }

    async fn list_transactions_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<CreditTransaction>, sqlx::Error> {
        self.maybe_fail()?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .transactions
            .iter()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl PaymentRepository for MockDb {
    async fn insert_record(&self, record: &PaymentRecord) -> Result<(), sqlx::Error> {
        self.maybe_fail()?;
        let mut state = self.state.lock().unwrap();
        state
            .payments
            .insert(record.order_id.clone(), record.clone());
        Ok(())
    }

    async fn find_by_order_id(
        &self,
        order_id: &str,
    ) -> Result<Option<PaymentRecord>, sqlx::Error> {
        self.maybe_fail()?;
        Ok(self.state.lock().unwrap().payments.get(order_id).cloned())
    }

    async fn find_by_invoice_id(
        &self,
        invoice_id: &str,
    ) -> Result<Option<PaymentRecord>, sqlx::Error> {
        self.maybe_fail()?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .payments
            .values()
            .find(|r| r.invoice_id.as_deref() == Some(invoice_id))
            .cloned())
    }

    async fn bind_invoice(
        &self,
        order_id: &str,
        invoice_id: &str,
        now: OffsetDateTime,
    ) -> Result<Option<String>, sqlx::Error> {
        self.maybe_fail()?;
        let mut state = self.state.lock().unwrap();

        let bound_elsewhere = state
            .payments
            .values()
            .any(|r| r.order_id != order_id && r.invoice_id.as_deref() == Some(invoice_id));
        if bound_elsewhere {
            // mirrors the unique-index violation the real store raises
            return Err(sqlx::Error::Protocol(
                "unique constraint violated: payment_records.invoice_id".into(),
            ));
        }

        let Some(record) = state.payments.get_mut(order_id) else {
            return Ok(None);
        };
        if record.invoice_id.is_none() {
            record.invoice_id = Some(invoice_id.to_string());
            record.updated_at = now;
        }
        Ok(record.invoice_id.clone())
    }

    async fn mark_processing(
        &self,
        order_id: &str,
        now: OffsetDateTime,
    ) -> Result<(), sqlx::Error> {
        self.maybe_fail()?;
        let mut state = self.state.lock().unwrap();
        if let Some(record) = state.payments.get_mut(order_id) {
            if record.status == PaymentStatus::Pending {
                record.status = PaymentStatus::Processing;
                record.updated_at = now;
            }
        }
        Ok(())
    }

    async fn mark_rejected(
        &self,
        order_id: &str,
        reason: &str,
        now: OffsetDateTime,
    ) -> Result<(), sqlx::Error> {
        self.maybe_fail()?;
        let mut state = self.state.lock().unwrap();
        if let Some(record) = state.payments.get_mut(order_id) {
            if !record.is_terminal() {
                record.status = PaymentStatus::Failed;
                record.approval_status = ApprovalStatus::Rejected;
                record.rejection_reason = Some(reason.to_string());
                record.updated_at = now;
            }
        }
        Ok(())
    }

    async fn record_advisory_charge(
        &self,
        order_id: &str,
        charged_amount: f64,
        now: OffsetDateTime,
    ) -> Result<(), sqlx::Error> {
        self.maybe_fail()?;
        let mut state = self.state.lock().unwrap();
        if let Some(record) = state.payments.get_mut(order_id) {
            record.charged_amount = Some(charged_amount);
            record.updated_at = now;
        }
        Ok(())
    }

    async fn complete_with_grant(
        &self,
        order_id: &str,
        verified_amount: f64,
        account: &CreditAccount,
        expected_version: i64,
        txn: &CreditTransaction,
        now: OffsetDateTime,
    ) -> Result<GrantCommit, sqlx::Error> {
        self.maybe_fail()?;
        let mut state = self.state.lock().unwrap();

        let claimable = state
            .payments
            .get(order_id)
            .map(|r| {
                matches!(
                    r.status,
                    PaymentStatus::Pending | PaymentStatus::Processing
                ) && r.approval_status == ApprovalStatus::Pending
            })
            .unwrap_or(false);
        if !claimable {
            return Ok(GrantCommit::RecordTerminal);
        }

        let version_ok = state
            .accounts
            .get(&account.user_id)
            .map(|a| a.version == expected_version)
            .unwrap_or(false);
        if !version_ok {
            return Ok(GrantCommit::AccountConflict);
        }

        let record = state
            .payments
            .get_mut(order_id)
            .expect("record existence checked above");
        record.status = PaymentStatus::Completed;
        record.approval_status = ApprovalStatus::Approved;
        record.verified_charged_amount = Some(verified_amount);
        record.updated_at = now;

        let stored = state
            .accounts
            .get_mut(&account.user_id)
            .expect("account existence checked above");
        *stored = account.clone();
        stored.version = expected_version + 1;

        state.transactions.push(txn.clone());
        Ok(GrantCommit::Applied)
    }
}
