use std::sync::Arc;

use serde_json::json;
use time::OffsetDateTime;
use tracing::info;
use uuid::Uuid;

use crate::errors::FlowError;
use crate::models::credit::CreditCategory;
use crate::models::transaction::{CreditTransaction, TransactionType};
use crate::services::ledger::CreditLedger;
use crate::services::provider::{ProviderRouter, RetryPolicy};

/// Floor for preflight estimates so a near-complete draft still reserves a
/// meaningful budget.
pub const MIN_WORD_ESTIMATE: i64 = 50;

pub fn estimate_words(target_words: i64, current_words: i64) -> i64 {
    (target_words - current_words).max(MIN_WORD_ESTIMATE)
}

pub fn word_count(text: &str) -> i64 {
    text.split_whitespace().count() as i64
}

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub user_id: Uuid,
    pub flow: String,
    pub prompt: String,
    pub target_words: i64,
    pub current_words: i64,
}

#[derive(Debug)]
pub struct GenerationOutcome {
    pub text: String,
    pub words_charged: i64,
    pub transaction: Option<CreditTransaction>,
}

/// Wraps provider calls between the preflight gate and the usage recorder:
/// insufficiency fails before any provider cost is incurred, and credits are
/// only consumed for delivered output, at the actually produced word count.
pub struct GenerationFlow {
    ledger: CreditLedger,
    router: Arc<ProviderRouter>,
    retry: RetryPolicy,
}

impl GenerationFlow {
    pub fn new(ledger: CreditLedger, router: Arc<ProviderRouter>, retry: RetryPolicy) -> Self {
        Self {
            ledger,
            router,
            retry,
        }
    }

    pub async fn run(
        &self,
        req: GenerationRequest,
        now: OffsetDateTime,
    ) -> Result<GenerationOutcome, FlowError> {
        let estimate = estimate_words(req.target_words, req.current_words);
        self.ledger
            .preflight_check(req.user_id, CreditCategory::Words, estimate, now)
            .await?;

        let provider = self.router.resolve(&req.flow);
        let prompt = req.prompt.clone();
        let text = self
            .retry
            .run(|| {
                let provider = provider.clone();
                let prompt = prompt.clone();
                async move { provider.generate(&prompt).await }
            })
            .await?;

        let actual = word_count(&text);
        let transaction = if actual > 0 {
            let txn = self
                .ledger
                .debit(
                    req.user_id,
                    CreditCategory::Words,
                    actual,
                    TransactionType::Usage,
                    &format!("{} generation", req.flow),
                    json!({ "flow": req.flow, "estimated": estimate }),
                    now,
                )
                .await?;
            Some(txn)
        } else {
            None
        };

        info!(
            user_id = %req.user_id,
            flow = %req.flow,
            estimated = estimate,
            charged = actual,
            "generation flow completed"
        );

        Ok(GenerationOutcome {
            text,
            words_charged: actual,
            transaction,
        })
    }
}
