//! Integration tests for the HTTP surface
//!
//! Tests cover:
//! - Wallet provisioning and balance reads
//! - Top-up creation, webhook delivery and crediting
//! - Signature, identity and admin guards
//! - Business-rule status codes

mod common;

use std::str::FromStr;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use common::Harness;
use credit_wallet::api::{self, AppState};
use credit_wallet::domain::IntentStatus;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use tower::ServiceExt;

const ADMIN_TOKEN: &str = "admin-test-token";

fn app(h: &Harness) -> Router {
    api::router(AppState {
        wallet: h.wallet.clone(),
        tracker: h.tracker.clone(),
        engine: h.engine.clone(),
        admin_token: ADMIN_TOKEN.to_string(),
    })
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn get(uri: &str, user: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("x-user-id", user)
        .body(Body::empty())
        .unwrap()
}

fn post_json(uri: &str, user: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(user) = user {
        builder = builder.header("x-user-id", user);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn decimal(value: &Value) -> Decimal {
    match value {
        Value::String(s) => Decimal::from_str(s).unwrap(),
        other => Decimal::from_str(&other.to_string()).unwrap(),
    }
}

#[tokio::test]
async fn test_health() {
    let h = Harness::new();
    let (status, body) = send(
        &app(&h),
        Request::builder().uri("/health").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_request_id_is_propagated() {
    let h = Harness::new();
    let response = app(&h)
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert!(response.headers().contains_key("x-request-id"));
}

#[tokio::test]
async fn test_get_wallet_provisions_empty_wallet() {
    let h = Harness::new();
    let (status, body) = send(&app(&h), get("/wallet", "player-1")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["userId"], "player-1");
    assert_eq!(decimal(&body["balance"]), Decimal::ZERO);
    assert_eq!(body["version"], 0);
}

#[tokio::test]
async fn test_missing_user_header_is_unauthorized() {
    let h = Harness::new();
    let request = Request::builder().uri("/wallet").body(Body::empty()).unwrap();
    let (status, body) = send(&app(&h), request).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "UNAUTHENTICATED");
}

#[tokio::test]
async fn test_top_up_webhook_credits_wallet() {
    let h = Harness::new();
    let app = app(&h);

    let (status, created) = send(
        &app,
        post_json(
            "/wallet/top-ups",
            Some("player-1"),
            json!({ "amount": "500.00", "idempotencyKey": "topup-1" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["status"], "CREATED");
    assert_eq!(created["stage"], "awaiting_payment");
    assert!(created["checkoutUrl"].as_str().unwrap().starts_with("https://"));
    let intent_id = created["intentId"].as_str().unwrap().to_string();

    let payload = h.signed_webhook(&intent_id, "SUCCEEDED", dec!(500.00));
    let (status, ack) = send(
        &app,
        post_json("/webhooks/payment", None, serde_json::to_value(&payload).unwrap()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["received"], true);
    assert_eq!(ack["outcome"]["kind"], "credited");

    // Duplicate delivery is acknowledged and ignored.
    let (status, ack) = send(
        &app,
        post_json("/webhooks/payment", None, serde_json::to_value(&payload).unwrap()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["outcome"]["kind"], "ignored");

    let (_, wallet) = send(&app, get("/wallet", "player-1")).await;
    assert_eq!(decimal(&wallet["balance"]), dec!(500));

    let (_, history) = send(&app, get("/wallet/transactions", "player-1")).await;
    let rows = history["transactions"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["type"], "DEPOSIT");
    assert_eq!(rows[0]["relatedIntentId"], intent_id.as_str());

    let (status, topup) = send(&app, get(&format!("/wallet/top-ups/{}", intent_id), "player-1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(topup["stage"], "credited");
}

#[tokio::test]
async fn test_webhook_with_bad_signature_is_rejected() {
    let h = Harness::new();
    let intent = h.tracker.create_intent("player-1", dec!(100), "k1").await.unwrap();

    let mut payload = h.signed_webhook(&intent.intent_id, "SUCCEEDED", dec!(100));
    payload.signature = Some("00".repeat(32));
    let (status, body) = send(
        &app(&h),
        post_json("/webhooks/payment", None, serde_json::to_value(&payload).unwrap()),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "INVALID_SIGNATURE");
    assert_eq!(body["error"]["intent_id"], intent.intent_id.as_str());
    assert_eq!(
        h.tracker.get_intent(&intent.intent_id).await.unwrap().status,
        IntentStatus::Created
    );
}

#[tokio::test]
async fn test_webhook_signature_accepted_from_header() {
    let h = Harness::new();
    let intent = h.tracker.create_intent("player-1", dec!(100), "k1").await.unwrap();
    let signature = h
        .signer
        .sign(&intent.intent_id, "FAILED", dec!(100))
        .unwrap();

    let request = Request::builder()
        .method("POST")
        .uri("/webhooks/payment")
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-webhook-signature", signature)
        .body(Body::from(
            json!({ "intentId": intent.intent_id, "status": "FAILED", "amount": "100.00" })
                .to_string(),
        ))
        .unwrap();
    let (status, ack) = send(&app(&h), request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["outcome"]["kind"], "closed");
}

#[tokio::test]
async fn test_top_up_below_minimum_is_rejected() {
    let h = Harness::new();
    let (status, body) = send(
        &app(&h),
        post_json(
            "/wallet/top-ups",
            Some("player-1"),
            json!({ "amount": "10.00", "idempotencyKey": "small" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "BELOW_MINIMUM");
    assert_eq!(h.gateway.create_calls(), 0);
}

#[tokio::test]
async fn test_gateway_outage_returns_retry_after() {
    let h = Harness::new();
    h.gateway.fail_next_create(credit_wallet::gateway::GatewayError::Timeout(
        "no answer".into(),
    ));

    let (status, body) = send(
        &app(&h),
        post_json(
            "/wallet/top-ups",
            Some("player-1"),
            json!({ "amount": "100.00", "idempotencyKey": "outage" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], "GATEWAY_UNAVAILABLE");
    assert_eq!(body["error"]["retry_after"], 10);
}

#[tokio::test]
async fn test_purchase_with_insufficient_funds() {
    let h = Harness::new();
    let (status, body) = send(
        &app(&h),
        post_json(
            "/wallet/purchases",
            Some("player-1"),
            json!({ "amount": "25.00", "description": "Dragon skin" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(body["error"]["code"], "INSUFFICIENT_FUNDS");
}

#[tokio::test]
async fn test_purchase_debits_balance() {
    let h = Harness::new();
    h.wallet.credit("player-1", dec!(100), "pi_seed").await.unwrap();

    let (status, body) = send(
        &app(&h),
        post_json(
            "/wallet/purchases",
            Some("player-1"),
            json!({ "amount": "25.00", "description": "Dragon skin" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["transaction"]["type"], "PURCHASE");
    assert_eq!(decimal(&body["wallet"]["balance"]), dec!(75));
}

#[tokio::test]
async fn test_top_up_of_another_user_is_not_found() {
    let h = Harness::new();
    let intent = h.tracker.create_intent("player-1", dec!(100), "k1").await.unwrap();

    let (status, _) = send(
        &app(&h),
        get(&format!("/wallet/top-ups/{}", intent.intent_id), "player-2"),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_client_report_cancel_is_provisional() {
    let h = Harness::new();
    let intent = h.tracker.create_intent("player-1", dec!(100), "k1").await.unwrap();

    let (status, body) = send(
        &app(&h),
        post_json(
            &format!("/wallet/top-ups/{}/client-report", intent.intent_id),
            Some("player-1"),
            json!({ "outcome": "cancelled" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "CREATED");
    assert_eq!(body["pendingConfirmation"], true);
    assert_eq!(body["outcome"]["kind"], "provisional");
}

#[tokio::test]
async fn test_admin_confirm_requires_token() {
    let h = Harness::new();
    let intent = h.tracker.create_intent("player-1", dec!(100), "k1").await.unwrap();
    let app = app(&h);
    let uri = format!("/admin/payment-intents/{}/confirm", intent.intent_id);

    let (status, body) = send(&app, post_json(&uri, None, json!({ "amount": "100.00" }))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "FORBIDDEN");

    let request = Request::builder()
        .method("POST")
        .uri(&uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-admin-token", ADMIN_TOKEN)
        .header("x-operator-id", "ops-7")
        .body(Body::from(json!({ "amount": "100.00" }).to_string()))
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "SUCCEEDED");
    assert_eq!(body["outcome"]["kind"], "credited");
    assert_eq!(h.balance("player-1").await, dec!(100.00));
}

#[tokio::test]
async fn test_admin_confirm_with_wrong_amount_conflicts() {
    let h = Harness::new();
    let intent = h.tracker.create_intent("player-1", dec!(100), "k1").await.unwrap();

    let request = Request::builder()
        .method("POST")
        .uri(format!("/admin/payment-intents/{}/confirm", intent.intent_id))
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-admin-token", ADMIN_TOKEN)
        .body(Body::from(json!({ "amount": "90.00" }).to_string()))
        .unwrap();
    let (status, body) = send(&app(&h), request).await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "AMOUNT_MISMATCH");
    assert_eq!(h.balance("player-1").await, Decimal::ZERO);
}
