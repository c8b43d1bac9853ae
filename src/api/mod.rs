//! HTTP surface
//!
//! Wallet reads, purchases and top-ups for players; the gateway webhook; and
//! operator actions behind the admin token.

pub mod admin;
pub mod auth;
pub mod error;
pub mod models;
pub mod topup;
pub mod wallet;
pub mod webhook;

use axum::http::HeaderName;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use std::sync::Arc;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::middleware::logging::{request_logging_middleware, UuidRequestId};
use crate::services::{IntentTracker, ReconciliationEngine, WalletService};
use models::HealthResponse;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Clone)]
pub struct AppState {
    pub wallet: Arc<WalletService>,
    pub tracker: Arc<IntentTracker>,
    pub engine: Arc<ReconciliationEngine>,
    pub admin_token: String,
}

pub fn router(state: AppState) -> Router {
    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);

    let admin_routes = Router::new()
        .route(
            "/payment-intents/{intent_id}/confirm",
            post(admin::confirm_intent),
        )
        .route("/wallets/{user_id}/refunds", post(admin::refund_wallet))
        .layer(from_fn_with_state(
            state.admin_token.clone(),
            auth::require_admin_token,
        ));

    Router::new()
        .route("/health", get(health))
        .route("/wallet", get(wallet::get_wallet))
        .route("/wallet/transactions", get(wallet::list_transactions))
        .route("/wallet/purchases", post(wallet::create_purchase))
        .route("/wallet/top-ups", post(topup::create_top_up))
        .route("/wallet/top-ups/{intent_id}", get(topup::get_top_up))
        .route(
            "/wallet/top-ups/{intent_id}/client-report",
            post(topup::report_client_outcome),
        )
        .route("/webhooks/payment", post(webhook::receive_payment_webhook))
        .nest("/admin", admin_routes)
        .with_state(state)
        .layer(from_fn(request_logging_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::new(request_id.clone()))
        .layer(SetRequestIdLayer::new(request_id, UuidRequestId))
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now(),
    })
}
