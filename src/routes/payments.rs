use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use time::OffsetDateTime;
use tracing::{error, warn};
use uuid::Uuid;

use crate::errors::{LedgerError, SettlementError};
use crate::models::payment::{new_order_id, PaymentRecord};
use crate::responses::JsonResponse;
use crate::services::gateway::{CreateInvoiceRequest, GatewayError};
use crate::services::settlement::SettlementOutcome;
use crate::state::AppState;

pub(crate) fn settlement_error_response(err: SettlementError) -> Response {
    match err {
        SettlementError::OrderNotFound(_) => {
            JsonResponse::not_found("Unknown order").into_response()
        }
        SettlementError::AlreadyTerminal(_) => {
            JsonResponse::conflict("Payment was rejected or cancelled").into_response()
        }
        SettlementError::MissingInvoice(_) => {
            Json(json!({
                "status": "pending",
                "success": false,
                "message": "Payment has not produced an invoice yet",
            }))
            .into_response()
        }
        SettlementError::VerificationFailed { .. } => Json(json!({
            "status": "pending",
            "success": false,
            "message": "Payment is not completed yet",
        }))
        .into_response(),
        SettlementError::InvoiceBindingViolation { .. } => {
            JsonResponse::forbidden_with_code(
                "Payment could not be validated",
                "invoice_binding_violation",
            )
            .into_response()
        }
        SettlementError::InvoiceReuse { .. } => JsonResponse::forbidden_with_code(
            "Payment could not be validated",
            "invoice_reuse",
        )
        .into_response(),
        SettlementError::AmountMismatch { .. } => JsonResponse::forbidden_with_code(
            "Charged amount does not match the plan price",
            "amount_mismatch",
        )
        .into_response(),
        SettlementError::PlanNotFound(_) => {
            JsonResponse::not_found("Plan is no longer available").into_response()
        }
        SettlementError::Gateway(GatewayError::Timeout) => {
            JsonResponse::service_unavailable("Payment verification timed out; please retry")
                .into_response()
        }
        SettlementError::Gateway(err) => {
            warn!(?err, "payment gateway error during settlement");
            JsonResponse::service_unavailable("Payment gateway unavailable").into_response()
        }
        SettlementError::Ledger(LedgerError::ConcurrentModification { .. }) => {
            JsonResponse::conflict("Account is busy, please retry").into_response()
        }
        SettlementError::Ledger(err) => {
            error!(?err, "ledger error during settlement");
            JsonResponse::server_error("Something went wrong").into_response()
        }
        SettlementError::Db(err) => {
            error!(?err, "database error during settlement");
            JsonResponse::server_error("Something went wrong").into_response()
        }
    }
}

#[derive(Deserialize)]
pub struct CheckoutPayload {
    pub user_id: Uuid,
    pub plan_id: String,
}

// POST /api/payments/checkout
pub async fn checkout(
    State(app_state): State<AppState>,
    Json(payload): Json<CheckoutPayload>,
) -> Response {
    let Some(plan) = app_state.catalog.find(&payload.plan_id) else {
        return JsonResponse::not_found("Unknown plan").into_response();
    };

    let now = OffsetDateTime::now_utc();
    let order_id = new_order_id();
    let record = PaymentRecord::new(payload.user_id, &plan, order_id.clone(), now);

    if let Err(err) = app_state.payments.insert_record(&record).await {
        error!(?err, %order_id, "failed to create payment record");
        return JsonResponse::server_error("Something went wrong").into_response();
    }

    let invoice = match app_state
        .gateway
        .create_invoice(CreateInvoiceRequest {
            order_id: order_id.clone(),
            amount: record.expected_amount,
            description: plan.name().to_string(),
        })
        .await
    {
        Ok(session) => session,
        Err(err) => {
            // record stays pending; the user can retry checkout
            warn!(?err, %order_id, "gateway invoice creation failed");
            return JsonResponse::service_unavailable("Payment gateway unavailable")
                .into_response();
        }
    };

    if let Some(invoice_id) = invoice.invoice_id.as_deref() {
        if let Err(err) = app_state
            .payments
            .bind_invoice(&order_id, invoice_id, now)
            .await
        {
            error!(?err, %order_id, invoice_id, "failed to bind gateway invoice");
            return JsonResponse::server_error("Something went wrong").into_response();
        }
    }

    Json(json!({
        "status": "success",
        "success": true,
        "order_id": order_id,
        "payment_url": invoice.payment_url,
    }))
    .into_response()
}

#[derive(Deserialize)]
pub struct VerifyPayload {
    pub order_id: String,
}

// POST /api/payments/verify — the user-initiated redirect path.
pub async fn verify(
    State(app_state): State<AppState>,
    Json(payload): Json<VerifyPayload>,
) -> Response {
    match app_state
        .settlement()
        .settle(&payload.order_id, None, None, OffsetDateTime::now_utc())
        .await
    {
        Ok(SettlementOutcome::Granted) | Ok(SettlementOutcome::AlreadySettled) => Json(json!({
            "status": "completed",
            "success": true,
        }))
        .into_response(),
        Err(err) => settlement_error_response(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::mock_db::MockDb;
    use crate::db::payment_repository::PaymentRepository;
    use crate::models::payment::PaymentStatus;
    use crate::routes::credits::tests::test_state;
    use crate::services::gateway::{
        GatewayPaymentStatus, MockGateway, VerifiedPayment,
    };
    use axum::extract::State as AxumState;
    use axum::http::StatusCode;
    use std::sync::Arc;

    fn now() -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap()
    }

    #[tokio::test]
    async fn checkout_captures_the_plan_price_into_the_record() {
        let db = Arc::new(MockDb::new());
        let gateway = Arc::new(MockGateway::new());
        gateway.set_next_invoice_id("inv_new");
        let state = test_state(db.clone(), gateway.clone());

        let resp = checkout(
            AxumState(state),
            Json(CheckoutPayload {
                user_id: Uuid::new_v4(),
                plan_id: "starter_monthly".into(),
            }),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);

        let requests = gateway.create_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].amount, 9.99);

        let record = db.payment(&requests[0].order_id).unwrap();
        assert_eq!(record.expected_amount, 9.99);
        assert_eq!(record.status, PaymentStatus::Pending);
        assert_eq!(record.invoice_id.as_deref(), Some("inv_new"));
    }

    #[tokio::test]
    async fn checkout_rejects_unknown_plans() {
        let db = Arc::new(MockDb::new());
        let state = test_state(db, Arc::new(MockGateway::new()));

        let resp = checkout(
            AxumState(state),
            Json(CheckoutPayload {
                user_id: Uuid::new_v4(),
                plan_id: "nope".into(),
            }),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn verify_settles_a_paid_order() {
        let db = Arc::new(MockDb::new());
        let gateway = Arc::new(MockGateway::new());
        let state = test_state(db.clone(), gateway.clone());

        let catalog = crate::models::plan::PlanCatalog::builtin();
        let plan = catalog.find("words_10k").unwrap();
        let record =
            PaymentRecord::new(Uuid::new_v4(), &plan, new_order_id(), now());
        db.seed_payment(record.clone());
        db.bind_invoice(&record.order_id, "inv_v", now()).await.unwrap();
        gateway.prime_verify(
            "inv_v",
            Ok(VerifiedPayment {
                status: GatewayPaymentStatus::Completed,
                invoice_id: "inv_v".into(),
                charged_amount: 4.99,
                amount: 4.99,
                order_id: Some(record.order_id.clone()),
                payment_method: Some("card".into()),
                transaction_id: None,
                fee: None,
            }),
        );

        let resp = verify(
            AxumState(state),
            Json(VerifyPayload {
                order_id: record.order_id.clone(),
            }),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(db.payment(&record.order_id).unwrap().is_settled());
        assert_eq!(
            db.account(record.user_id).unwrap().words.remaining_addon,
            10_000
        );
    }

    #[tokio::test]
    async fn verify_reports_pending_before_payment_completes() {
        let db = Arc::new(MockDb::new());
        let gateway = Arc::new(MockGateway::new());
        let state = test_state(db.clone(), gateway);

        let catalog = crate::models::plan::PlanCatalog::builtin();
        let plan = catalog.find("words_10k").unwrap();
        let record =
            PaymentRecord::new(Uuid::new_v4(), &plan, new_order_id(), now());
        db.seed_payment(record.clone());

        let resp = verify(
            AxumState(state),
            Json(VerifyPayload {
                order_id: record.order_id.clone(),
            }),
        )
        .await;
        // no invoice yet: pending, not an error
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), 4096).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "pending");
    }
}
