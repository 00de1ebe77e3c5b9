use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::{
    CreateInvoiceRequest, GatewayError, GatewayPaymentStatus, InvoiceSession, PaymentGateway,
    VerifiedPayment,
};

/// HTTP client for the payment gateway's public API. Authenticated with a
/// static `X-Api-Key` header; every call carries a bounded timeout so a hung
/// gateway can never wedge a settlement in a lock.
pub struct LiveGateway {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
}

impl LiveGateway {
    pub fn new(
        api_base: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_base: api_base.into(),
            api_key: api_key.into(),
        }
    }

    pub fn from_settings(settings: &crate::config::GatewaySettings) -> Self {
        Self::new(
            settings.api_base.clone(),
            settings.api_key.clone(),
            Duration::from_secs(settings.verify_timeout_secs),
        )
    }

    fn map_error(err: reqwest::Error) -> GatewayError {
        if err.is_timeout() {
            GatewayError::Timeout
        } else {
            GatewayError::Http(err.to_string())
        }
    }
}

#[derive(Deserialize)]
struct CreateInvoiceWire {
    id: Option<String>,
    payment_url: String,
}

#[derive(Deserialize)]
struct VerifyMetadataWire {
    order_id: Option<String>,
}

#[derive(Deserialize)]
struct VerifyWire {
    status: String,
    invoice_id: String,
    charged_amount: f64,
    amount: f64,
    #[serde(default)]
    metadata: Option<VerifyMetadataWire>,
    payment_method: Option<String>,
    transaction_id: Option<String>,
    fee: Option<f64>,
}

#[async_trait]
impl PaymentGateway for LiveGateway {
    async fn create_invoice(
        &self,
        req: CreateInvoiceRequest,
    ) -> Result<InvoiceSession, GatewayError> {
        let resp = self
            .client
            .post(format!("{}/api/v1/invoices", self.api_base))
            .header("X-Api-Key", &self.api_key)
            .json(&serde_json::json!({
                "amount": req.amount,
                "description": req.description,
                "metadata": { "order_id": req.order_id },
            }))
            .send()
            .await
            .map_err(Self::map_error)?;

        let status = resp.status();
        let body = resp.text().await.map_err(Self::map_error)?;

        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(GatewayError::Auth);
        }
        if !status.is_success() {
            return Err(GatewayError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let wire: CreateInvoiceWire = serde_json::from_str(&body)
            .map_err(|e| GatewayError::InvalidResponse(format!("{e}; body={body}")))?;
        Ok(InvoiceSession {
            invoice_id: wire.id,
            payment_url: wire.payment_url,
        })
    }

    async fn verify_payment(&self, invoice_id: &str) -> Result<VerifiedPayment, GatewayError> {
        let resp = self
            .client
            .get(format!(
                "{}/api/v1/invoices/{}/verify",
                self.api_base, invoice_id
            ))
            .header("X-Api-Key", &self.api_key)
            .send()
            .await
            .map_err(Self::map_error)?;

        let status = resp.status();
        let body = resp.text().await.map_err(Self::map_error)?;

        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(GatewayError::Auth);
        }
        if !status.is_success() {
            return Err(GatewayError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let wire: VerifyWire = serde_json::from_str(&body)
            .map_err(|e| GatewayError::InvalidResponse(format!("{e}; body={body}")))?;
        Ok(VerifiedPayment {
            status: GatewayPaymentStatus::from_wire(&wire.status),
            invoice_id: wire.invoice_id,
            charged_amount: wire.charged_amount,
            amount: wire.amount,
            order_id: wire.metadata.and_then(|m| m.order_id),
            payment_method: wire.payment_method,
            transaction_id: wire.transaction_id,
            fee: wire.fee,
        })
    }
}
