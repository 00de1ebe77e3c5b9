use rand::RngCore;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::models::credit::ParseEnumError;
use crate::models::plan::{PlanKind, PricedPlan};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Processing => "processing",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, ParseEnumError> {
        match raw {
            "pending" => Ok(PaymentStatus::Pending),
            "processing" => Ok(PaymentStatus::Processing),
            "completed" => Ok(PaymentStatus::Completed),
            "failed" => Ok(PaymentStatus::Failed),
            "cancelled" => Ok(PaymentStatus::Cancelled),
            other => Err(ParseEnumError(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, ParseEnumError> {
        match raw {
            "pending" => Ok(ApprovalStatus::Pending),
            "approved" => Ok(ApprovalStatus::Approved),
            "rejected" => Ok(ApprovalStatus::Rejected),
            other => Err(ParseEnumError(other.to_string())),
        }
    }
}

/// One record per checkout order. The `status`/`approval_status` pair acts as
/// the settlement claim token; `invoice_id` is set at most once and carries a
/// global unique index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub order_id: String,
    pub user_id: Uuid,
    pub plan_id: String,
    pub plan_kind: PlanKind,
    pub expected_amount: f64,
    pub status: PaymentStatus,
    pub approval_status: ApprovalStatus,
    pub invoice_id: Option<String>,
    pub charged_amount: Option<f64>,
    pub verified_charged_amount: Option<f64>,
    pub rejection_reason: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl PaymentRecord {
    /// Captures the plan's price at checkout time; settlement compares the
    /// gateway-verified charge against this snapshot, never the live catalog.
    pub fn new(user_id: Uuid, plan: &PricedPlan<'_>, order_id: String, now: OffsetDateTime) -> Self {
        Self {
            order_id,
            user_id,
            plan_id: plan.id().to_string(),
            plan_kind: plan.kind(),
            expected_amount: plan.price(),
            status: PaymentStatus::Pending,
            approval_status: ApprovalStatus::Pending,
            invoice_id: None,
            charged_amount: None,
            verified_charged_amount: None,
            rejection_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_settled(&self) -> bool {
        self.status == PaymentStatus::Completed && self.approval_status == ApprovalStatus::Approved
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            PaymentStatus::Completed | PaymentStatus::Failed | PaymentStatus::Cancelled
        )
    }
}

pub fn new_order_id() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    format!("ord_{}", hex::encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::plan::PlanCatalog;

    #[test]
    fn checkout_snapshot_captures_plan_price_and_kind() {
        let catalog = PlanCatalog::builtin();
        let plan = catalog.find("words_10k").unwrap();
        let now = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();

        let record = PaymentRecord::new(Uuid::new_v4(), &plan, new_order_id(), now);
        assert_eq!(record.expected_amount, 4.99);
        assert_eq!(record.plan_kind, PlanKind::Addon);
        assert_eq!(record.status, PaymentStatus::Pending);
        assert_eq!(record.approval_status, ApprovalStatus::Pending);
        assert!(record.invoice_id.is_none());
        assert!(!record.is_terminal());
    }

    #[test]
    fn order_ids_are_prefixed_and_unique() {
        let a = new_order_id();
        let b = new_order_id();
        assert!(a.starts_with("ord_"));
        assert_eq!(a.len(), 4 + 32);
        assert_ne!(a, b);
    }
}
