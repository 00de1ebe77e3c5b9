use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    #[error("gateway api error status={status} body={body}")]
    Api { status: u16, body: String },
    #[error("gateway request timed out")]
    Timeout,
    #[error("gateway rejected our credentials")]
    Auth,
    #[error("http error: {0}")]
    Http(String),
    #[error("invalid gateway response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayPaymentStatus {
    Completed,
    Pending,
    Failed,
}

impl GatewayPaymentStatus {
    pub fn from_wire(raw: &str) -> Self {
        match raw {
            "completed" | "success" | "succeeded" | "paid" => GatewayPaymentStatus::Completed,
            "pending" | "processing" | "in_progress" => GatewayPaymentStatus::Pending,
            _ => GatewayPaymentStatus::Failed,
        }
    }
}

/// The authoritative verification result. `charged_amount` from this call is
/// the only amount settlement trusts; webhook and client figures are
/// advisory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifiedPayment {
    pub status: GatewayPaymentStatus,
    pub invoice_id: String,
    pub charged_amount: f64,
    pub amount: f64,
    pub order_id: Option<String>,
    pub payment_method: Option<String>,
    pub transaction_id: Option<String>,
    pub fee: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateInvoiceRequest {
    pub order_id: String,
    pub amount: f64,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceSession {
    pub invoice_id: Option<String>,
    pub payment_url: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_invoice(
        &self,
        req: CreateInvoiceRequest,
    ) -> Result<InvoiceSession, GatewayError>;

    async fn verify_payment(&self, invoice_id: &str) -> Result<VerifiedPayment, GatewayError>;
}

mod live;
mod mock;

pub use live::LiveGateway;
pub use mock::MockGateway;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_statuses_normalize_to_the_three_outcomes() {
        assert_eq!(
            GatewayPaymentStatus::from_wire("paid"),
            GatewayPaymentStatus::Completed
        );
        assert_eq!(
            GatewayPaymentStatus::from_wire("in_progress"),
            GatewayPaymentStatus::Pending
        );
        assert_eq!(
            GatewayPaymentStatus::from_wire("expired"),
            GatewayPaymentStatus::Failed
        );
    }

    #[tokio::test]
    async fn mock_returns_primed_verification_and_captures_calls() {
        let mock = MockGateway::new();
        mock.prime_verify(
            "inv_1",
            Ok(VerifiedPayment {
                status: GatewayPaymentStatus::Completed,
                invoice_id: "inv_1".into(),
                charged_amount: 9.99,
                amount: 9.99,
                order_id: Some("ord_abc".into()),
                payment_method: Some("card".into()),
                transaction_id: Some("txn_1".into()),
                fee: Some(0.35),
            }),
        );

        let verified = mock.verify_payment("inv_1").await.unwrap();
        assert_eq!(verified.charged_amount, 9.99);
        assert_eq!(mock.verify_calls(), vec!["inv_1".to_string()]);

        let missing = mock.verify_payment("inv_unknown").await;
        assert!(matches!(missing, Err(GatewayError::Api { status: 404, .. })));
    }
}
