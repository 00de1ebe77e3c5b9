use std::sync::Arc;

use reqwest::Client;

use crate::config::Config;
use crate::db::credit_account_repository::CreditAccountRepository;
use crate::db::payment_repository::PaymentRepository;
use crate::models::plan::PlanCatalog;
use crate::services::gateway::PaymentGateway;
use crate::services::ledger::CreditLedger;
use crate::services::settlement::SettlementProcessor;
use crate::services::webhook_guard::WebhookGuard;

#[derive(Clone)]
pub struct AppState {
    pub accounts: Arc<dyn CreditAccountRepository>,
    pub payments: Arc<dyn PaymentRepository>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub catalog: Arc<PlanCatalog>,
    pub http_client: Arc<Client>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn ledger(&self) -> CreditLedger {
        CreditLedger::new(self.accounts.clone(), self.catalog.clone())
    }

    pub fn settlement(&self) -> SettlementProcessor {
        SettlementProcessor::new(
            self.payments.clone(),
            self.accounts.clone(),
            self.gateway.clone(),
            self.catalog.clone(),
        )
    }

    /// Fresh guard per request from the immutable config snapshot; no shared
    /// mutable secret state.
    pub fn webhook_guard(&self) -> WebhookGuard {
        WebhookGuard::new(self.config.gateway.webhook_secret.clone())
    }
}
