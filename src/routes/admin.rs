use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use time::OffsetDateTime;
use tracing::info;
use uuid::Uuid;

use crate::models::credit::{CreditCategory, CreditSource};
use crate::responses::JsonResponse;
use crate::routes::credits::ledger_error_response;
use crate::routes::payments::settlement_error_response;
use crate::services::settlement::SettlementOutcome;
use crate::state::AppState;

const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

fn authorize_admin(app_state: &AppState, headers: &HeaderMap) -> bool {
    let Some(provided) = headers
        .get(ADMIN_TOKEN_HEADER)
        .and_then(|h| h.to_str().ok())
    else {
        return false;
    };
    let expected = Sha256::digest(app_state.config.admin_api_token.as_bytes());
    let received = Sha256::digest(provided.as_bytes());
    bool::from(expected.as_slice().ct_eq(received.as_slice()))
}

#[derive(Deserialize)]
pub struct ApprovePayload {
    pub order_id: String,
}

// POST /api/admin/payments/approve
//
// Manual override runs the exact same settlement pipeline as the automated
// paths: re-verify, validate, grant, approve.
pub async fn approve_payment(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<ApprovePayload>,
) -> Response {
    if !authorize_admin(&app_state, &headers) {
        return JsonResponse::unauthorized("Admin credentials required").into_response();
    }

    match app_state
        .settlement()
        .settle(&payload.order_id, None, None, OffsetDateTime::now_utc())
        .await
    {
        Ok(outcome) => {
            info!(order_id = %payload.order_id, ?outcome, "admin approval processed");
            let already = outcome == SettlementOutcome::AlreadySettled;
            Json(json!({
                "status": "success",
                "success": true,
                "already_settled": already,
            }))
            .into_response()
        }
        Err(err) => settlement_error_response(err),
    }
}

#[derive(Deserialize)]
pub struct GrantPayload {
    pub user_id: Uuid,
    pub category: CreditCategory,
    pub amount: i64,
    pub note: Option<String>,
}

// POST /api/admin/credits/grant
pub async fn grant_credits(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<GrantPayload>,
) -> Response {
    if !authorize_admin(&app_state, &headers) {
        return JsonResponse::unauthorized("Admin credentials required").into_response();
    }

    match app_state
        .ledger()
        .credit(
            payload.user_id,
            payload.category,
            payload.amount,
            CreditSource::Admin,
            json!({ "note": payload.note }),
            OffsetDateTime::now_utc(),
        )
        .await
    {
        Ok(txn) => {
            info!(
                user_id = %payload.user_id,
                category = payload.category.as_str(),
                amount = payload.amount,
                "admin credit grant applied"
            );
            Json(json!({
                "status": "success",
                "success": true,
                "transaction_id": txn.id,
            }))
            .into_response()
        }
        Err(err) => ledger_error_response(err),
    }
}

#[derive(Deserialize)]
pub struct TrialPayload {
    pub user_id: Uuid,
    pub expires_at: OffsetDateTime,
    #[serde(default)]
    pub words: i64,
    #[serde(default)]
    pub books: i64,
    #[serde(default)]
    pub offers: i64,
}

// POST /api/admin/credits/trial
pub async fn grant_trial(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<TrialPayload>,
) -> Response {
    if !authorize_admin(&app_state, &headers) {
        return JsonResponse::unauthorized("Admin credentials required").into_response();
    }

    let now = OffsetDateTime::now_utc();
    let ledger = app_state.ledger();
    let grants = [
        (CreditCategory::Words, payload.words),
        (CreditCategory::Books, payload.books),
        (CreditCategory::Offers, payload.offers),
    ];

    let mut transaction_ids = Vec::new();
    for (category, amount) in grants {
        if amount <= 0 {
            continue;
        }
        match ledger
            .grant_trial(
                payload.user_id,
                category,
                amount,
                payload.expires_at,
                json!({ "granted_by": "admin" }),
                now,
            )
            .await
        {
            Ok(txn) => transaction_ids.push(txn.id),
            Err(err) => return ledger_error_response(err),
        }
    }

    if transaction_ids.is_empty() {
        return JsonResponse::bad_request("Trial grant must include at least one category")
            .into_response();
    }

    Json(json!({
        "status": "success",
        "success": true,
        "transaction_ids": transaction_ids,
    }))
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::mock_db::MockDb;
    use crate::db::payment_repository::PaymentRepository;
    use crate::models::payment::{new_order_id, PaymentRecord};
    use crate::models::plan::PlanCatalog;
    use crate::models::transaction::TransactionType;
    use crate::routes::credits::tests::test_state;
    use crate::services::gateway::{
        GatewayPaymentStatus, MockGateway, VerifiedPayment,
    };
    use axum::extract::State as AxumState;
    use axum::http::{HeaderValue, StatusCode};
    use std::sync::Arc;
    use time::Duration;

    fn now() -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap()
    }

    fn admin_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            ADMIN_TOKEN_HEADER,
            HeaderValue::from_static("admin-test-token"),
        );
        headers
    }

    #[tokio::test]
    async fn admin_routes_require_the_token() {
        let db = Arc::new(MockDb::new());
        let state = test_state(db.clone(), Arc::new(MockGateway::new()));

        let resp = grant_credits(
            AxumState(state),
            HeaderMap::new(),
            Json(GrantPayload {
                user_id: Uuid::new_v4(),
                category: CreditCategory::Words,
                amount: 100,
                note: None,
            }),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert!(db.transactions().is_empty());
    }

    #[tokio::test]
    async fn wrong_token_is_rejected() {
        let db = Arc::new(MockDb::new());
        let state = test_state(db, Arc::new(MockGateway::new()));

        let mut headers = HeaderMap::new();
        headers.insert(ADMIN_TOKEN_HEADER, HeaderValue::from_static("guess"));
        let resp = grant_credits(
            AxumState(state),
            headers,
            Json(GrantPayload {
                user_id: Uuid::new_v4(),
                category: CreditCategory::Words,
                amount: 100,
                note: None,
            }),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn grant_lands_in_the_admin_bucket() {
        let db = Arc::new(MockDb::new());
        let state = test_state(db.clone(), Arc::new(MockGateway::new()));
        let user_id = Uuid::new_v4();

        let resp = grant_credits(
            AxumState(state),
            admin_headers(),
            Json(GrantPayload {
                user_id,
                category: CreditCategory::Words,
                amount: 5_000,
                note: Some("support makegood".into()),
            }),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);

        let account = db.account(user_id).unwrap();
        assert_eq!(account.words.remaining_admin, 5_000);
        let txns = db.transactions();
        assert_eq!(txns[0].txn_type, TransactionType::AdminAllocation);
        assert_eq!(txns[0].metadata["note"], "support makegood");
    }

    #[tokio::test]
    async fn trial_grant_fills_buckets_and_sets_expiry() {
        let db = Arc::new(MockDb::new());
        let state = test_state(db.clone(), Arc::new(MockGateway::new()));
        let user_id = Uuid::new_v4();
        let expires_at = now() + Duration::days(14);

        let resp = grant_trial(
            AxumState(state),
            admin_headers(),
            Json(TrialPayload {
                user_id,
                expires_at,
                words: 2_000,
                books: 1,
                offers: 0,
            }),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);

        let account = db.account(user_id).unwrap();
        assert_eq!(account.words.remaining_trial, 2_000);
        assert_eq!(account.books.remaining_trial, 1);
        assert_eq!(account.offers.remaining_trial, 0);
        assert_eq!(account.trial_expires_at, Some(expires_at));
        assert_eq!(db.transactions().len(), 2);
    }

    #[tokio::test]
    async fn admin_approval_uses_the_same_settlement_path() {
        let db = Arc::new(MockDb::new());
        let gateway = Arc::new(MockGateway::new());
        let state = test_state(db.clone(), gateway.clone());

        let catalog = PlanCatalog::builtin();
        let plan = catalog.find("words_10k").unwrap();
        let record = PaymentRecord::new(Uuid::new_v4(), &plan, new_order_id(), now());
        db.seed_payment(record.clone());
        db.bind_invoice(&record.order_id, "inv_adm", now())
            .await
            .unwrap();
        gateway.prime_verify(
            "inv_adm",
            Ok(VerifiedPayment {
                status: GatewayPaymentStatus::Completed,
                invoice_id: "inv_adm".into(),
                charged_amount: 4.99,
                amount: 4.99,
                order_id: Some(record.order_id.clone()),
                payment_method: Some("card".into()),
                transaction_id: None,
                fee: None,
            }),
        );

        let resp = approve_payment(
            AxumState(state.clone()),
            admin_headers(),
            Json(ApprovePayload {
                order_id: record.order_id.clone(),
            }),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(db.payment(&record.order_id).unwrap().is_settled());

        // approving again is an idempotent no-op
        let resp = approve_payment(
            AxumState(state),
            admin_headers(),
            Json(ApprovePayload {
                order_id: record.order_id.clone(),
            }),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let purchases: Vec<_> = db
            .transactions()
            .into_iter()
            .filter(|t| t.txn_type == TransactionType::Purchase)
            .collect();
        assert_eq!(purchases.len(), 1);
    }
}
