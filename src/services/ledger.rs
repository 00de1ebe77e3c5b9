use std::sync::Arc;

use serde_json::Value;
use time::OffsetDateTime;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::db::credit_account_repository::CreditAccountRepository;
use crate::errors::LedgerError;
use crate::models::credit::{
    CategorySummary, CreditAccount, CreditCategory, CreditSource, CreditSummary,
};
use crate::models::plan::PlanCatalog;
use crate::models::transaction::{CreditTransaction, TransactionType};
use crate::services::cycle;

/// Bounded optimistic-concurrency retries before surfacing
/// `ConcurrentModification` to the caller.
pub const MAX_CAS_RETRIES: u32 = 5;

pub(crate) async fn load_or_create_account(
    repo: &dyn CreditAccountRepository,
    user_id: Uuid,
    now: OffsetDateTime,
) -> Result<CreditAccount, sqlx::Error> {
    if let Some(account) = repo.find_account(user_id).await? {
        return Ok(account);
    }
    let fresh = CreditAccount::new(user_id, now);
    repo.insert_account(&fresh).await?;
    // A concurrent creator may have won; read back whatever is stored.
    Ok(repo.find_account(user_id).await?.unwrap_or(fresh))
}

/// Applies lazy cycle rollover and trial expiry to an in-memory copy. Pure
/// with respect to storage; callers persist through the CAS path when they
/// intend the normalization to stick.
pub(crate) fn normalize_account(
    account: &mut CreditAccount,
    catalog: &PlanCatalog,
    now: OffsetDateTime,
) {
    if let Some(plan_id) = account.active_plan_id.clone() {
        if let Some(plan) = catalog.find_subscription(&plan_id) {
            cycle::roll_cycle_if_due(account, plan, now);
        }
    }
    cycle::expire_trial_if_due(account, now);
}

/// Per-user, per-category balances with atomic debit/credit primitives.
#[derive(Clone)]
pub struct CreditLedger {
    accounts: Arc<dyn CreditAccountRepository>,
    catalog: Arc<PlanCatalog>,
}

impl CreditLedger {
    pub fn new(accounts: Arc<dyn CreditAccountRepository>, catalog: Arc<PlanCatalog>) -> Self {
        Self { accounts, catalog }
    }

    /// Non-mutating sufficiency check. Safe to call on every request; an
    /// unknown user simply reads as an empty account.
    pub async fn preflight_check(
        &self,
        user_id: Uuid,
        category: CreditCategory,
        amount: i64,
        now: OffsetDateTime,
    ) -> Result<(), LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }

        let mut account = self
            .accounts
            .find_account(user_id)
            .await?
            .unwrap_or_else(|| CreditAccount::new(user_id, now));
        normalize_account(&mut account, &self.catalog, now);

        let available = account.available(category, now);
        if available < amount {
            return Err(LedgerError::InsufficientCredits {
                category,
                requested: amount,
                available,
            });
        }
        Ok(())
    }

    /// Atomically re-checks sufficiency and drains buckets in precedence
    /// order (plan allotment, addons, admin grants, trial), writing one
    /// ledger entry per successful call.
    pub async fn debit(
        &self,
        user_id: Uuid,
        category: CreditCategory,
        amount: i64,
        txn_type: TransactionType,
        description: &str,
        metadata: Value,
        now: OffsetDateTime,
    ) -> Result<CreditTransaction, LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }

        for attempt in 0..MAX_CAS_RETRIES {
            let mut account =
                load_or_create_account(self.accounts.as_ref(), user_id, now).await?;
            let expected = account.version;
            normalize_account(&mut account, &self.catalog, now);

            let available = account.available(category, now);
            if available < amount {
                return Err(LedgerError::InsufficientCredits {
                    category,
                    requested: amount,
                    available,
                });
            }

            let trial_active = account.trial_active(now);
            account.bucket_mut(category).drain(amount, trial_active);
            account.updated_at = now;

            let txn = CreditTransaction::new(
                user_id,
                txn_type,
                category,
                -amount,
                description,
                metadata.clone(),
                now,
            );

            if self.accounts.commit_mutation(&account, expected, &txn).await? {
                debug!(%user_id, category = category.as_str(), amount, "debited credits");
                return Ok(txn);
            }
            warn!(%user_id, attempt, "credit account version conflict on debit; retrying");
        }

        Err(LedgerError::ConcurrentModification { user_id })
    }

    /// Grants credits into the bucket matching `source`. The plan-allotment
    /// bucket is out of reach by construction; only the subscription cycle
    /// logic writes it.
    pub async fn credit(
        &self,
        user_id: Uuid,
        category: CreditCategory,
        amount: i64,
        source: CreditSource,
        metadata: Value,
        now: OffsetDateTime,
    ) -> Result<CreditTransaction, LedgerError> {
        let txn_type = match source {
            CreditSource::Addon => TransactionType::Purchase,
            CreditSource::Admin => TransactionType::AdminAllocation,
            CreditSource::Trial => TransactionType::TrialGrant,
        };
        let description = format!("{} credit grant", source.as_str());
        self.apply_grant(
            user_id,
            category,
            amount,
            txn_type,
            &description,
            metadata,
            now,
            move |account| {
                let bucket = account.bucket_mut(category);
                match source {
                    CreditSource::Addon => bucket.remaining_addon += amount,
                    CreditSource::Admin => bucket.remaining_admin += amount,
                    CreditSource::Trial => bucket.remaining_trial += amount,
                }
            },
        )
        .await
    }

    /// Time-boxed trial grant: fills the trial bucket and (re)arms the
    /// expiry clock.
    pub async fn grant_trial(
        &self,
        user_id: Uuid,
        category: CreditCategory,
        amount: i64,
        expires_at: OffsetDateTime,
        metadata: Value,
        now: OffsetDateTime,
    ) -> Result<CreditTransaction, LedgerError> {
        self.apply_grant(
            user_id,
            category,
            amount,
            TransactionType::TrialGrant,
            "trial credit grant",
            metadata,
            now,
            move |account| {
                account.bucket_mut(category).remaining_trial += amount;
                account.trial_expires_at = Some(expires_at);
            },
        )
        .await
    }

    /// Deleting a book project returns its slot. Refunds land in the addon
    /// bucket so they never expire with the billing cycle.
    pub async fn refund_deleted_project(
        &self,
        user_id: Uuid,
        project_id: &str,
        now: OffsetDateTime,
    ) -> Result<CreditTransaction, LedgerError> {
        self.apply_grant(
            user_id,
            CreditCategory::Books,
            1,
            TransactionType::DeletionRefund,
            "book project deleted",
            serde_json::json!({ "project_id": project_id }),
            now,
            |account| account.books.remaining_addon += 1,
        )
        .await
    }

    /// Read-only aggregation for display; never persists anything, including
    /// pending rollover or trial expiry (those are applied on the next
    /// mutation).
    pub async fn get_summary(
        &self,
        user_id: Uuid,
        now: OffsetDateTime,
    ) -> Result<CreditSummary, LedgerError> {
        let mut account = self
            .accounts
            .find_account(user_id)
            .await?
            .unwrap_or_else(|| CreditAccount::new(user_id, now));
        normalize_account(&mut account, &self.catalog, now);

        let summarize = |category: CreditCategory| {
            let bucket = account.bucket(category);
            let trial_active = account.trial_active(now);
            let trial = if trial_active { bucket.remaining_trial } else { 0 };
            CategorySummary {
                available: bucket.available(trial_active),
                used: bucket.used_this_cycle,
                total: bucket.plan_total_this_cycle
                    + bucket.remaining_addon
                    + bucket.remaining_admin
                    + trial,
            }
        };

        let active_plan = account.active_plan_id.as_deref().map(|id| {
            self.catalog
                .find_subscription(id)
                .map(|p| p.name.clone())
                .unwrap_or_else(|| id.to_string())
        });

        Ok(CreditSummary {
            words: summarize(CreditCategory::Words),
            books: summarize(CreditCategory::Books),
            offers: summarize(CreditCategory::Offers),
            active_plan,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn apply_grant(
        &self,
        user_id: Uuid,
        category: CreditCategory,
        amount: i64,
        txn_type: TransactionType,
        description: &str,
        metadata: Value,
        now: OffsetDateTime,
        apply: impl Fn(&mut CreditAccount),
    ) -> Result<CreditTransaction, LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }

        for attempt in 0..MAX_CAS_RETRIES {
            let mut account =
                load_or_create_account(self.accounts.as_ref(), user_id, now).await?;
            let expected = account.version;
            normalize_account(&mut account, &self.catalog, now);

            apply(&mut account);
            account.updated_at = now;

            let txn = CreditTransaction::new(
                user_id,
                txn_type,
                category,
                amount,
                description,
                metadata.clone(),
                now,
            );

            if self.accounts.commit_mutation(&account, expected, &txn).await? {
                debug!(%user_id, category = category.as_str(), amount, txn_type = txn_type.as_str(), "credited account");
                return Ok(txn);
            }
            warn!(%user_id, attempt, "credit account version conflict on grant; retrying");
        }

        Err(LedgerError::ConcurrentModification { user_id })
    }
}
