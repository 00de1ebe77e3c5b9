use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use time::OffsetDateTime;
use tracing::{error, info, warn};

use crate::errors::SettlementError;
use crate::responses::JsonResponse;
use crate::services::webhook_guard::{WebhookAuthError, WebhookGuard};
use crate::state::AppState;

// POST /api/payments/webhook
//
// Replies 200 for every event the gateway should not redeliver, including
// security rejections (those are already terminal and alerted). Only
// transient infrastructure failures return 5xx so the gateway retries.
pub async fn gateway_webhook(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    let guard = app_state.webhook_guard();
    if let Err(err) = guard.authenticate(&headers, &body) {
        warn!(%err, "gateway webhook rejected");
        return JsonResponse::unauthorized("Invalid webhook credentials").into_response();
    }

    let event = match WebhookGuard::parse_event(&body) {
        Ok(event) => event,
        Err(WebhookAuthError::MalformedPayload(reason)) => {
            warn!(%reason, "malformed gateway webhook payload");
            return JsonResponse::bad_request("Malformed webhook payload").into_response();
        }
        Err(err) => {
            warn!(%err, "gateway webhook rejected");
            return JsonResponse::unauthorized("Invalid webhook credentials").into_response();
        }
    };

    let outcome = app_state
        .settlement()
        .settle(
            &event.order_id,
            Some(&event.invoice_id),
            event.charged_amount,
            OffsetDateTime::now_utc(),
        )
        .await;

    match outcome {
        Ok(result) => {
            info!(
                order_id = %event.order_id,
                invoice_id = %event.invoice_id,
                ?result,
                "gateway webhook settled"
            );
            Json(json!({ "received": true })).into_response()
        }
        Err(SettlementError::OrderNotFound(_)) => {
            // not ours; acknowledge so the gateway stops redelivering
            info!(order_id = %event.order_id, "webhook for unknown order ignored");
            Json(json!({ "received": true, "ignored": true })).into_response()
        }
        Err(err) if err.is_security_violation() => {
            // alert already raised inside settlement; swallow the retry
            Json(json!({ "received": true })).into_response()
        }
        Err(
            err @ (SettlementError::AlreadyTerminal(_)
            | SettlementError::VerificationFailed { .. }
            | SettlementError::MissingInvoice(_)
            | SettlementError::PlanNotFound(_)),
        ) => {
            warn!(%err, order_id = %event.order_id, "webhook acknowledged without grant");
            Json(json!({ "received": true })).into_response()
        }
        Err(err) => {
            // gateway/db trouble: ask for a redelivery
            error!(%err, order_id = %event.order_id, "webhook settlement failed transiently");
            JsonResponse::service_unavailable("Settlement temporarily unavailable")
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::mock_db::MockDb;
    use crate::models::payment::{new_order_id, PaymentRecord, PaymentStatus};
    use crate::models::plan::PlanCatalog;
    use crate::models::transaction::TransactionType;
    use crate::routes::credits::tests::test_state;
    use crate::services::gateway::{
        GatewayError, GatewayPaymentStatus, MockGateway, VerifiedPayment,
    };
    use axum::extract::State as AxumState;
    use axum::http::{HeaderValue, StatusCode};
    use std::sync::Arc;
    use uuid::Uuid;

    fn now() -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap()
    }

    fn auth_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-webhook-key",
            HeaderValue::from_static("0123456789abcdef0123456789ABCDEF"),
        );
        headers
    }

    fn webhook_body(invoice_id: &str, order_id: &str, charged: f64) -> axum::body::Bytes {
        axum::body::Bytes::from(
            serde_json::to_vec(&json!({
                "invoice_id": invoice_id,
                "metadata": { "order_id": order_id },
                "charged_amount": charged,
                "payment_method": "card",
                "transaction_id": "txn_1",
                "fee": 0.3,
            }))
            .unwrap(),
        )
    }

    fn seed_order(db: &MockDb, plan_id: &str) -> PaymentRecord {
        let catalog = PlanCatalog::builtin();
        let plan = catalog.find(plan_id).unwrap();
        let record = PaymentRecord::new(Uuid::new_v4(), &plan, new_order_id(), now());
        db.seed_payment(record.clone());
        record
    }

    fn paid(invoice_id: &str, order_id: &str, charged: f64) -> VerifiedPayment {
        VerifiedPayment {
            status: GatewayPaymentStatus::Completed,
            invoice_id: invoice_id.into(),
            charged_amount: charged,
            amount: charged,
            order_id: Some(order_id.into()),
            payment_method: Some("card".into()),
            transaction_id: Some("txn_1".into()),
            fee: Some(0.3),
        }
    }

    #[tokio::test]
    async fn missing_secret_is_unauthorized_with_no_state_change() {
        let db = Arc::new(MockDb::new());
        let record = seed_order(&db, "words_10k");
        let state = test_state(db.clone(), Arc::new(MockGateway::new()));

        let resp = gateway_webhook(
            AxumState(state),
            HeaderMap::new(),
            webhook_body("inv_1", &record.order_id, 4.99),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let stored = db.payment(&record.order_id).unwrap();
        assert_eq!(stored.status, PaymentStatus::Pending);
        assert!(stored.invoice_id.is_none());
        assert!(db.transactions().is_empty());
    }

    #[tokio::test]
    async fn delivering_the_same_webhook_twice_grants_once() {
        let db = Arc::new(MockDb::new());
        let gateway = Arc::new(MockGateway::new());
        let record = seed_order(&db, "words_10k");
        gateway.prime_verify("inv_123", Ok(paid("inv_123", &record.order_id, 4.99)));
        let state = test_state(db.clone(), gateway);

        for _ in 0..2 {
            let resp = gateway_webhook(
                AxumState(state.clone()),
                auth_headers(),
                webhook_body("inv_123", &record.order_id, 4.99),
            )
            .await;
            assert_eq!(resp.status(), StatusCode::OK);
        }

        let purchases: Vec<_> = db
            .transactions()
            .into_iter()
            .filter(|t| t.txn_type == TransactionType::Purchase)
            .collect();
        assert_eq!(purchases.len(), 1);
        assert!(db.payment(&record.order_id).unwrap().is_settled());
    }

    #[tokio::test]
    async fn unknown_orders_are_acknowledged_and_ignored() {
        let db = Arc::new(MockDb::new());
        let state = test_state(db.clone(), Arc::new(MockGateway::new()));

        let resp = gateway_webhook(
            AxumState(state),
            auth_headers(),
            webhook_body("inv_1", "ord_unknown", 4.99),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(db.transactions().is_empty());
    }

    #[tokio::test]
    async fn reused_invoice_is_acknowledged_but_grants_nothing() {
        let db = Arc::new(MockDb::new());
        let gateway = Arc::new(MockGateway::new());
        let first = seed_order(&db, "words_10k");
        gateway.prime_verify("inv_999", Ok(paid("inv_999", &first.order_id, 4.99)));
        let state = test_state(db.clone(), gateway.clone());

        let resp = gateway_webhook(
            AxumState(state.clone()),
            auth_headers(),
            webhook_body("inv_999", &first.order_id, 4.99),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);

        // replay the same invoice against a different order
        let second = seed_order(&db, "words_10k");
        let resp = gateway_webhook(
            AxumState(state),
            auth_headers(),
            webhook_body("inv_999", &second.order_id, 4.99),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);

        assert!(db.account(second.user_id).is_none());
        assert_eq!(db.transactions().len(), 1);
        let stored = db.payment(&second.order_id).unwrap();
        assert!(!stored.is_settled());
    }

    #[tokio::test]
    async fn gateway_timeout_requests_redelivery() {
        let db = Arc::new(MockDb::new());
        let gateway = Arc::new(MockGateway::new());
        let record = seed_order(&db, "words_10k");
        gateway.prime_verify("inv_to", Err(GatewayError::Timeout));
        let state = test_state(db.clone(), gateway);

        let resp = gateway_webhook(
            AxumState(state),
            auth_headers(),
            webhook_body("inv_to", &record.order_id, 4.99),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

        // left in processing for the retry
        assert_eq!(
            db.payment(&record.order_id).unwrap().status,
            PaymentStatus::Processing
        );
    }

    #[tokio::test]
    async fn malformed_payload_is_a_bad_request() {
        let db = Arc::new(MockDb::new());
        let state = test_state(db, Arc::new(MockGateway::new()));

        let resp = gateway_webhook(
            AxumState(state),
            auth_headers(),
            axum::body::Bytes::from_static(b"{\"invoice_id\": \"inv\"}"),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
