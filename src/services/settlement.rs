use std::sync::Arc;

use serde_json::json;
use time::OffsetDateTime;
use tracing::{error, info, warn};

use crate::db::credit_account_repository::CreditAccountRepository;
use crate::db::payment_repository::{GrantCommit, PaymentRepository};
use crate::errors::SettlementError;
use crate::models::credit::CreditAccount;
use crate::models::payment::PaymentRecord;
use crate::models::plan::{PlanCatalog, PricedPlan};
use crate::models::transaction::{CreditTransaction, TransactionType};
use crate::services::cycle;
use crate::services::gateway::{GatewayPaymentStatus, PaymentGateway};
use crate::services::ledger::{load_or_create_account, normalize_account, MAX_CAS_RETRIES};

/// Verified charge may differ from the captured price by at most this much.
pub const AMOUNT_TOLERANCE: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementOutcome {
    /// Credits were granted by this call.
    Granted,
    /// A previous call already granted; nothing changed.
    AlreadySettled,
}

/// The single entry point that converts a verified payment into ledger
/// credits. The webhook, the redirect-verify endpoint, and the manual admin
/// approval all call this and nothing else, so exactly-once holds no matter
/// which of them races ahead.
pub struct SettlementProcessor {
    payments: Arc<dyn PaymentRepository>,
    accounts: Arc<dyn CreditAccountRepository>,
    gateway: Arc<dyn PaymentGateway>,
    catalog: Arc<PlanCatalog>,
}

impl SettlementProcessor {
    pub fn new(
        payments: Arc<dyn PaymentRepository>,
        accounts: Arc<dyn CreditAccountRepository>,
        gateway: Arc<dyn PaymentGateway>,
        catalog: Arc<PlanCatalog>,
    ) -> Self {
        Self {
            payments,
            accounts,
            gateway,
            catalog,
        }
    }

    pub async fn settle(
        &self,
        order_id: &str,
        claimed_invoice_id: Option<&str>,
        advisory_amount: Option<f64>,
        now: OffsetDateTime,
    ) -> Result<SettlementOutcome, SettlementError> {
        let record = self
            .payments
            .find_by_order_id(order_id)
            .await?
            .ok_or_else(|| SettlementError::OrderNotFound(order_id.to_string()))?;

        if record.is_settled() {
            return Ok(SettlementOutcome::AlreadySettled);
        }
        if record.is_terminal() {
            return Err(SettlementError::AlreadyTerminal(order_id.to_string()));
        }

        let invoice_id = self
            .resolve_invoice_binding(&record, claimed_invoice_id)
            .await?;

        if let Some(charged) = advisory_amount {
            // advisory only; never compared against, never trusted
            self.payments
                .record_advisory_charge(order_id, charged, now)
                .await?;
        }

        self.payments.mark_processing(order_id, now).await?;

        // Authoritative verification happens outside any claim or lock; a
        // timeout leaves the record in processing for a later retry.
        let verified = self.gateway.verify_payment(&invoice_id).await?;

        if verified.status != GatewayPaymentStatus::Completed {
            warn!(
                order_id,
                %invoice_id,
                status = ?verified.status,
                "gateway does not report the payment as completed; aborting without mutation"
            );
            return Err(SettlementError::VerificationFailed { invoice_id });
        }

        // Invoice substitution check: the order the gateway bound the money
        // to must be the order we are settling.
        if verified.order_id.as_deref() != Some(order_id) {
            error!(
                security_alert = true,
                order_id,
                %invoice_id,
                verified_order = verified.order_id.as_deref().unwrap_or("<none>"),
                "invoice belongs to a different order; rejecting settlement"
            );
            return Err(SettlementError::InvoiceBindingViolation {
                order_id: order_id.to_string(),
                bound: verified.order_id.unwrap_or_default(),
                incoming: invoice_id,
            });
        }

        // Binding is safe to persist only after the authoritative match.
        self.payments.bind_invoice(order_id, &invoice_id, now).await?;

        let Some(plan) = self.catalog.find(&record.plan_id) else {
            self.payments
                .mark_rejected(order_id, "purchased plan is no longer in the catalog", now)
                .await?;
            return Err(SettlementError::PlanNotFound(record.plan_id.clone()));
        };

        if (verified.charged_amount - record.expected_amount).abs() > AMOUNT_TOLERANCE {
            let reason = format!(
                "charged amount {:.2} does not match expected {:.2}",
                verified.charged_amount, record.expected_amount
            );
            error!(
                security_alert = true,
                order_id, %invoice_id, %reason, "amount mismatch; rejecting settlement"
            );
            self.payments.mark_rejected(order_id, &reason, now).await?;
            return Err(SettlementError::AmountMismatch {
                expected: record.expected_amount,
                charged: verified.charged_amount,
            });
        }

        for _ in 0..MAX_CAS_RETRIES {
            let mut account =
                load_or_create_account(self.accounts.as_ref(), record.user_id, now).await?;
            let expected = account.version;
            normalize_account(&mut account, &self.catalog, now);

            let txn = apply_purchase(&mut account, &plan, &record, &invoice_id, now);
            account.updated_at = now;

            match self
                .payments
                .complete_with_grant(
                    order_id,
                    verified.charged_amount,
                    &account,
                    expected,
                    &txn,
                    now,
                )
                .await?
            {
                GrantCommit::Applied => {
                    info!(
                        order_id,
                        %invoice_id,
                        plan_id = %record.plan_id,
                        user_id = %record.user_id,
                        "payment settled; credits granted"
                    );
                    return Ok(SettlementOutcome::Granted);
                }
                GrantCommit::RecordTerminal => {
                    // another settler claimed the record between our read
                    // and the commit; mirror whatever it decided
                    let latest = self
                        .payments
                        .find_by_order_id(order_id)
                        .await?
                        .ok_or_else(|| SettlementError::OrderNotFound(order_id.to_string()))?;
                    return if latest.is_settled() {
                        Ok(SettlementOutcome::AlreadySettled)
                    } else {
                        Err(SettlementError::AlreadyTerminal(order_id.to_string()))
                    };
                }
                GrantCommit::AccountConflict => continue,
            }
        }

        Err(SettlementError::Ledger(
            crate::errors::LedgerError::ConcurrentModification {
                user_id: record.user_id,
            },
        ))
    }

    /// Invoice binding invariants, enforced before anything else touches the
    /// record: a bound invoice is immutable, and an invoice funds exactly one
    /// order.
    async fn resolve_invoice_binding(
        &self,
        record: &PaymentRecord,
        claimed_invoice_id: Option<&str>,
    ) -> Result<String, SettlementError> {
        match (record.invoice_id.as_deref(), claimed_invoice_id) {
            (Some(bound), Some(claimed)) if bound != claimed => {
                error!(
                    security_alert = true,
                    order_id = %record.order_id,
                    bound,
                    claimed,
                    "event carries a different invoice than the one bound to the order"
                );
                Err(SettlementError::InvoiceBindingViolation {
                    order_id: record.order_id.clone(),
                    bound: bound.to_string(),
                    incoming: claimed.to_string(),
                })
            }
            (Some(bound), _) => Ok(bound.to_string()),
            (None, Some(claimed)) => {
                if let Some(other) = self.payments.find_by_invoice_id(claimed).await? {
                    if other.order_id != record.order_id {
                        error!(
                            security_alert = true,
                            order_id = %record.order_id,
                            other_order = %other.order_id,
                            invoice_id = claimed,
                            "invoice is already bound to another order"
                        );
                        return Err(SettlementError::InvoiceReuse {
                            invoice_id: claimed.to_string(),
                        });
                    }
                }
                Ok(claimed.to_string())
            }
            (None, None) => Err(SettlementError::MissingInvoice(record.order_id.clone())),
        }
    }
}

/// Applies the purchase to an in-memory account copy and builds the matching
/// ledger entry. Subscription purchases anchor a fresh cycle; addon packs
/// fill the non-expiring addon bucket.
fn apply_purchase(
    account: &mut CreditAccount,
    plan: &PricedPlan<'_>,
    record: &PaymentRecord,
    invoice_id: &str,
    now: OffsetDateTime,
) -> CreditTransaction {
    match plan {
        PricedPlan::Addon(addon) => {
            account.bucket_mut(addon.category).remaining_addon += addon.amount;
            CreditTransaction::new(
                record.user_id,
                TransactionType::Purchase,
                addon.category,
                addon.amount,
                format!("purchase: {}", addon.name),
                json!({
                    "order_id": record.order_id,
                    "invoice_id": invoice_id,
                    "plan_id": addon.id,
                }),
                now,
            )
        }
        PricedPlan::Subscription(sub) => {
            cycle::activate_plan(account, sub, now);
            CreditTransaction::new(
                record.user_id,
                TransactionType::Purchase,
                crate::models::credit::CreditCategory::Words,
                sub.allotment.words,
                format!("subscription: {}", sub.name),
                json!({
                    "order_id": record.order_id,
                    "invoice_id": invoice_id,
                    "plan_id": sub.id,
                    "allotment": {
                        "words": sub.allotment.words,
                        "books": sub.allotment.books,
                        "offers": sub.allotment.offers,
                    },
                }),
                now,
            )
        }
    }
}
