use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::models::credit::{CreditCategory, ParseEnumError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Usage,
    Purchase,
    AdminAllocation,
    TrialGrant,
    DeletionRefund,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Usage => "usage",
            TransactionType::Purchase => "purchase",
            TransactionType::AdminAllocation => "admin_allocation",
            TransactionType::TrialGrant => "trial_grant",
            TransactionType::DeletionRefund => "deletion_refund",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, ParseEnumError> {
        match raw {
            "usage" => Ok(TransactionType::Usage),
            "purchase" => Ok(TransactionType::Purchase),
            "admin_allocation" => Ok(TransactionType::AdminAllocation),
            "trial_grant" => Ok(TransactionType::TrialGrant),
            "deletion_refund" => Ok(TransactionType::DeletionRefund),
            other => Err(ParseEnumError(other.to_string())),
        }
    }
}

/// Append-only ledger entry. Debits carry a negative amount, grants a
/// positive one; replaying a user's entries reconciles with the account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditTransaction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub txn_type: TransactionType,
    pub category: CreditCategory,
    pub amount: i64,
    pub description: String,
    pub metadata: Value,
    pub created_at: OffsetDateTime,
}

impl CreditTransaction {
    pub fn new(
        user_id: Uuid,
        txn_type: TransactionType,
        category: CreditCategory,
        amount: i64,
        description: impl Into<String>,
        metadata: Value,
        now: OffsetDateTime,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            txn_type,
            category,
            amount,
            description: description.into(),
            metadata,
            created_at: now,
        }
    }
}
