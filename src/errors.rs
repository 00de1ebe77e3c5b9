use uuid::Uuid;

use crate::models::credit::CreditCategory;
use crate::services::gateway::GatewayError;
use crate::services::provider::ProviderError;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("insufficient {category:?} credits: requested {requested}, available {available}")]
    InsufficientCredits {
        category: CreditCategory,
        requested: i64,
        available: i64,
    },
    #[error("credit account for user {user_id} was modified concurrently")]
    ConcurrentModification { user_id: Uuid },
    #[error("credit amount must be positive, got {0}")]
    InvalidAmount(i64),
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum SettlementError {
    #[error("unknown order: {0}")]
    OrderNotFound(String),
    #[error("order {0} is already in a terminal non-approved state")]
    AlreadyTerminal(String),
    #[error("order {0} has no invoice to verify")]
    MissingInvoice(String),
    #[error("invoice {incoming} conflicts with invoice {bound} already bound to order {order_id}")]
    InvoiceBindingViolation {
        order_id: String,
        bound: String,
        incoming: String,
    },
    #[error("invoice {invoice_id} is already bound to a different order")]
    InvoiceReuse { invoice_id: String },
    #[error("charged amount {charged} does not match expected {expected}")]
    AmountMismatch { expected: f64, charged: f64 },
    #[error("plan {0} is not in the catalog")]
    PlanNotFound(String),
    #[error("gateway reported payment {invoice_id} as not completed")]
    VerificationFailed { invoice_id: String },
    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

impl SettlementError {
    /// Security-class failures always reject, always alert, never grant.
    pub fn is_security_violation(&self) -> bool {
        matches!(
            self,
            SettlementError::InvoiceBindingViolation { .. }
                | SettlementError::InvoiceReuse { .. }
                | SettlementError::AmountMismatch { .. }
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
}
