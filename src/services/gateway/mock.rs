use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{
    CreateInvoiceRequest, GatewayError, InvoiceSession, PaymentGateway, VerifiedPayment,
};

/// Test double: verification responses are primed per invoice id, and every
/// call is captured for assertions.
#[derive(Default)]
pub struct MockGateway {
    verify_responses: Mutex<HashMap<String, Result<VerifiedPayment, GatewayError>>>,
    verify_calls: Mutex<Vec<String>>,
    create_requests: Mutex<Vec<CreateInvoiceRequest>>,
    next_invoice_id: Mutex<Option<String>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prime_verify(
        &self,
        invoice_id: impl Into<String>,
        response: Result<VerifiedPayment, GatewayError>,
    ) {
        self.verify_responses
            .lock()
            .unwrap()
            .insert(invoice_id.into(), response);
    }

    pub fn set_next_invoice_id(&self, invoice_id: impl Into<String>) {
        *self.next_invoice_id.lock().unwrap() = Some(invoice_id.into());
    }

    pub fn verify_calls(&self) -> Vec<String> {
        self.verify_calls.lock().unwrap().clone()
    }

    pub fn create_requests(&self) -> Vec<CreateInvoiceRequest> {
        self.create_requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn create_invoice(
        &self,
        req: CreateInvoiceRequest,
    ) -> Result<InvoiceSession, GatewayError> {
        self.create_requests.lock().unwrap().push(req);
        let invoice_id = self.next_invoice_id.lock().unwrap().take();
        Ok(InvoiceSession {
            invoice_id,
            payment_url: "https://pay.example.test/checkout".into(),
        })
    }

    async fn verify_payment(&self, invoice_id: &str) -> Result<VerifiedPayment, GatewayError> {
        self.verify_calls
            .lock()
            .unwrap()
            .push(invoice_id.to_string());
        self.verify_responses
            .lock()
            .unwrap()
            .get(invoice_id)
            .cloned()
            .unwrap_or_else(|| {
                Err(GatewayError::Api {
                    status: 404,
                    body: format!("unknown invoice {invoice_id}"),
                })
            })
    }
}
