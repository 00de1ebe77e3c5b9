use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use time::OffsetDateTime;
use tracing::error;
use uuid::Uuid;

use crate::errors::LedgerError;
use crate::models::credit::CreditCategory;
use crate::models::transaction::TransactionType;
use crate::responses::JsonResponse;
use crate::state::AppState;

pub(crate) fn ledger_error_response(err: LedgerError) -> Response {
    match err {
        LedgerError::InsufficientCredits { .. } => {
            JsonResponse::payment_required("Insufficient credits", "insufficient_credits")
                .into_response()
        }
        LedgerError::ConcurrentModification { .. } => {
            JsonResponse::conflict("Account is busy, please retry").into_response()
        }
        LedgerError::InvalidAmount(_) => {
            JsonResponse::bad_request("Amount must be a positive number").into_response()
        }
        LedgerError::Db(err) => {
            error!(?err, "ledger database error");
            JsonResponse::server_error("Something went wrong").into_response()
        }
    }
}

// GET /api/credits/{user_id}/summary
pub async fn get_summary(
    State(app_state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Response {
    match app_state
        .ledger()
        .get_summary(user_id, OffsetDateTime::now_utc())
        .await
    {
        Ok(summary) => Json(summary).into_response(),
        Err(err) => ledger_error_response(err),
    }
}

#[derive(Deserialize)]
pub struct PreflightPayload {
    pub user_id: Uuid,
    pub category: CreditCategory,
    pub amount: i64,
}

// POST /api/credits/preflight
pub async fn preflight(
    State(app_state): State<AppState>,
    Json(payload): Json<PreflightPayload>,
) -> Response {
    match app_state
        .ledger()
        .preflight_check(
            payload.user_id,
            payload.category,
            payload.amount,
            OffsetDateTime::now_utc(),
        )
        .await
    {
        Ok(()) => JsonResponse::success("Sufficient credits").into_response(),
        Err(err) => ledger_error_response(err),
    }
}

#[derive(Deserialize)]
pub struct DebitPayload {
    pub user_id: Uuid,
    pub category: CreditCategory,
    pub amount: i64,
    pub flow: String,
    #[serde(default)]
    pub metadata: Value,
}

// POST /api/credits/debit
pub async fn debit(
    State(app_state): State<AppState>,
    Json(payload): Json<DebitPayload>,
) -> Response {
    let mut metadata = payload.metadata.clone();
    if let Some(map) = metadata.as_object_mut() {
        map.insert("flow".into(), Value::String(payload.flow.clone()));
    } else {
        metadata = json!({ "flow": payload.flow });
    }

    match app_state
        .ledger()
        .debit(
            payload.user_id,
            payload.category,
            payload.amount,
            TransactionType::Usage,
            &format!("{} usage", payload.flow),
            metadata,
            OffsetDateTime::now_utc(),
        )
        .await
    {
        Ok(txn) => Json(json!({
            "status": "success",
            "success": true,
            "transaction_id": txn.id,
            "amount": txn.amount,
        }))
        .into_response(),
        Err(err) => ledger_error_response(err),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::mock_db::MockDb;
    use crate::models::credit::CreditAccount;
    use crate::models::plan::PlanCatalog;
    use crate::services::gateway::MockGateway;
    use crate::state::AppState;
    use axum::extract::State as AxumState;
    use axum::http::StatusCode;
    use reqwest::Client;
    use std::sync::Arc;

    pub(crate) fn test_config() -> Arc<crate::config::Config> {
        Arc::new(crate::config::Config {
            database_url: String::new(),
            frontend_origin: "https://app.example.com".into(),
            gateway: crate::config::GatewaySettings {
                api_base: "https://gate.example.test".into(),
                api_key: "test-key".into(),
                webhook_secret: "0123456789abcdef0123456789ABCDEF".into(),
                verify_timeout_secs: 5,
            },
            admin_api_token: "admin-test-token".into(),
        })
    }

    pub(crate) fn test_state(db: Arc<MockDb>, gateway: Arc<MockGateway>) -> AppState {
        AppState {
            accounts: db.clone(),
            payments: db,
            gateway,
            catalog: Arc::new(PlanCatalog::builtin().clone()),
            http_client: Arc::new(Client::new()),
            config: test_config(),
        }
    }

    fn now() -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap()
    }

    #[tokio::test]
    async fn preflight_reports_insufficiency_with_payment_required() {
        let db = Arc::new(MockDb::new());
        let state = test_state(db, Arc::new(MockGateway::new()));

        let resp = preflight(
            AxumState(state),
            Json(PreflightPayload {
                user_id: Uuid::new_v4(),
                category: CreditCategory::Words,
                amount: 100,
            }),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::PAYMENT_REQUIRED);
    }

    #[tokio::test]
    async fn debit_spends_and_returns_the_transaction() {
        let db = Arc::new(MockDb::new());
        let user_id = Uuid::new_v4();
        let mut account = CreditAccount::new(user_id, now());
        account.words.remaining_addon = 500;
        db.seed_account(account);

        let state = test_state(db.clone(), Arc::new(MockGateway::new()));
        let resp = debit(
            AxumState(state),
            Json(DebitPayload {
                user_id,
                category: CreditCategory::Words,
                amount: 120,
                flow: "chapter".into(),
                metadata: json!({ "project_id": "prj_1" }),
            }),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);

        let txns = db.transactions();
        assert_eq!(txns.len(), 1);
        assert_eq!(txns[0].amount, -120);
        assert_eq!(txns[0].metadata["flow"], "chapter");
        assert_eq!(txns[0].metadata["project_id"], "prj_1");
    }

    #[tokio::test]
    async fn summary_returns_per_category_balances() {
        let db = Arc::new(MockDb::new());
        let user_id = Uuid::new_v4();
        let mut account = CreditAccount::new(user_id, now());
        account.words.remaining_admin = 750;
        db.seed_account(account);

        let state = test_state(db, Arc::new(MockGateway::new()));
        let resp = get_summary(AxumState(state), Path(user_id)).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let body = axum::body::to_bytes(resp.into_body(), 4096).await.unwrap();
        let summary: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(summary["words"]["available"], 750);
        assert_eq!(summary["books"]["available"], 0);
    }

    #[tokio::test]
    async fn database_failures_surface_as_server_errors() {
        let db = Arc::new(MockDb::new());
        *db.should_fail.lock().unwrap() = true;

        let state = test_state(db, Arc::new(MockGateway::new()));
        let resp = get_summary(AxumState(state), Path(Uuid::new_v4())).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
