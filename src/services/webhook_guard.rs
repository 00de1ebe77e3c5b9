use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

pub const WEBHOOK_KEY_HEADER: &str = "x-webhook-key";
pub const WEBHOOK_SIGNATURE_HEADER: &str = "x-webhook-signature";

#[derive(Debug, thiserror::Error)]
pub enum WebhookAuthError {
    #[error("missing webhook credentials")]
    MissingCredentials,
    #[error("webhook credentials rejected")]
    InvalidCredentials,
    #[error("malformed webhook payload: {0}")]
    MalformedPayload(String),
}

#[derive(Debug, Deserialize)]
struct WebhookMetadata {
    order_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WebhookWire {
    invoice_id: String,
    #[serde(default)]
    metadata: Option<WebhookMetadata>,
    charged_amount: Option<f64>,
    payment_method: Option<String>,
    transaction_id: Option<String>,
    fee: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct GatewayWebhookEvent {
    pub invoice_id: String,
    pub order_id: String,
    pub charged_amount: Option<f64>,
    pub payment_method: Option<String>,
    pub transaction_id: Option<String>,
    pub fee: Option<f64>,
}

/// Authenticates inbound gateway events. Accepts either the static shared
/// secret header or an HMAC-SHA256 signature over the raw body; both
/// comparisons are constant-time.
pub struct WebhookGuard {
    secret: String,
}

impl WebhookGuard {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    pub fn authenticate(&self, headers: &HeaderMap, body: &[u8]) -> Result<(), WebhookAuthError> {
        if let Some(provided) = headers
            .get(WEBHOOK_KEY_HEADER)
            .and_then(|h| h.to_str().ok())
        {
            // digest both sides first so the comparison length never leaks
            let expected = Sha256::digest(self.secret.as_bytes());
            let received = Sha256::digest(provided.as_bytes());
            if bool::from(expected.as_slice().ct_eq(received.as_slice())) {
                return Ok(());
            }
            return Err(WebhookAuthError::InvalidCredentials);
        }

        if let Some(signature) = headers
            .get(WEBHOOK_SIGNATURE_HEADER)
            .and_then(|h| h.to_str().ok())
        {
            let provided =
                hex::decode(signature).map_err(|_| WebhookAuthError::InvalidCredentials)?;
            let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
                .map_err(|_| WebhookAuthError::InvalidCredentials)?;
            mac.update(body);
            let expected = mac.finalize().into_bytes();
            if bool::from(expected.as_slice().ct_eq(provided.as_slice())) {
                return Ok(());
            }
            return Err(WebhookAuthError::InvalidCredentials);
        }

        Err(WebhookAuthError::MissingCredentials)
    }

    /// Parses the event and requires both halves of the binding: the gateway
    /// invoice id and the order the event claims to settle.
    pub fn parse_event(body: &[u8]) -> Result<GatewayWebhookEvent, WebhookAuthError> {
        let wire: WebhookWire = serde_json::from_slice(body)
            .map_err(|e| WebhookAuthError::MalformedPayload(e.to_string()))?;

        let order_id = wire
            .metadata
            .and_then(|m| m.order_id)
            .ok_or_else(|| WebhookAuthError::MalformedPayload("missing metadata.order_id".into()))?;

        Ok(GatewayWebhookEvent {
            invoice_id: wire.invoice_id,
            order_id,
            charged_amount: wire.charged_amount,
            payment_method: wire.payment_method,
            transaction_id: wire.transaction_id,
            fee: wire.fee,
        })
    }
}
