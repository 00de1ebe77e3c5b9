use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::HeaderValue;
use axum::http::Method;
use axum::{
    http::HeaderName,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use reqwest::Client;
use sqlx::PgPool;
use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use booksmith_backend::config::Config;
use booksmith_backend::db::postgres_credit_account_repository::PostgresCreditAccountRepository;
use booksmith_backend::db::postgres_payment_repository::PostgresPaymentRepository;
use booksmith_backend::models::plan::PlanCatalog;
use booksmith_backend::responses::JsonResponse;
use booksmith_backend::routes::{
    admin::{approve_payment, grant_credits, grant_trial},
    credits::{debit, get_summary, preflight},
    payments::{checkout, verify},
    webhook::gateway_webhook,
};
use booksmith_backend::services::gateway::LiveGateway;
use booksmith_backend::state::AppState;

#[tokio::main]
async fn main() {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber).unwrap();

    let rate_limit_ms: u64 = std::env::var("RATE_LIMITER_MILLISECONDS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        // Default: 200ms/token (~5 req/sec)
        .unwrap_or(200);
    let rate_limit_burst: u32 = std::env::var("RATE_LIMITER_BURST")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(20);
    let global_governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_millisecond(rate_limit_ms)
            .burst_size(rate_limit_burst)
            .use_headers()
            .error_handler(|_err| {
                JsonResponse::too_many_requests(
                    "Too many requests. Please wait a moment and try again.",
                )
                .into_response()
            })
            .finish()
            .unwrap(),
    );

    // Background task to cleanup old rate-limiter entries
    let governor_limiter = global_governor_conf.limiter().clone();
    std::thread::spawn(move || {
        let interval = std::time::Duration::from_secs(60);
        loop {
            std::thread::sleep(interval);
            governor_limiter.retain_recent();
        }
    });

    let config = Arc::new(Config::from_env());

    let pg_pool = establish_connection(&config.database_url).await;
    let accounts = Arc::new(PostgresCreditAccountRepository {
        pool: pg_pool.clone(),
    });
    let payments = Arc::new(PostgresPaymentRepository {
        pool: pg_pool.clone(),
    });

    let gateway = Arc::new(LiveGateway::from_settings(&config.gateway));
    let http_client = Arc::new(Client::new());

    let state = AppState {
        accounts,
        payments,
        gateway,
        catalog: Arc::new(PlanCatalog::builtin().clone()),
        http_client,
        config: config.clone(),
    };

    let cors = CorsLayer::new()
        .allow_origin(config.frontend_origin.parse::<HeaderValue>().unwrap())
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([
            AUTHORIZATION,
            CONTENT_TYPE,
            HeaderName::from_static("x-admin-token"),
        ])
        .allow_credentials(true);

    let credit_routes = Router::new()
        .route("/{user_id}/summary", get(get_summary))
        .route("/preflight", post(preflight))
        .route("/debit", post(debit));

    let payment_routes = Router::new()
        .route("/checkout", post(checkout))
        .route("/verify", post(verify))
        // Public webhook route (no CSRF, no session auth; shared-secret guarded)
        .route("/webhook", post(gateway_webhook));

    let admin_routes = Router::new()
        .route("/payments/approve", post(approve_payment))
        .route("/credits/grant", post(grant_credits))
        .route("/credits/trial", post(grant_trial));

    let app = Router::new()
        .route("/", get(root))
        .nest("/api/credits", credit_routes)
        .nest("/api/payments", payment_routes)
        .nest("/api/admin", admin_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(GovernorLayer {
            config: global_governor_conf.clone(),
        })
        .layer(cors);

    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse::<u16>().ok())
        .unwrap_or(3000);
    let addr = SocketAddr::from(([127, 0, 0, 1], port));

    let listener = TcpListener::bind(addr).await.unwrap();
    info!("listening on http://{}", addr);
    axum::serve(listener, make_service).await.unwrap();
}

/// A simple root route.
async fn root() -> Response {
    JsonResponse::success("Booksmith credits service").into_response()
}

/// Establish a connection to the database and verify it.
async fn establish_connection(database_url: &str) -> PgPool {
    let pool = PgPool::connect(database_url)
        .await
        .expect("Failed to connect to the database");

    sqlx::query("SELECT 1")
        .execute(&pool)
        .await
        .expect("Failed to verify database connection");

    info!("successfully connected to the database");
    pool
}
