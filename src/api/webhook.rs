//! Gateway webhook receiver

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use tracing::info;

use super::error::ApiError;
use super::models::WebhookAck;
use super::AppState;
use crate::gateway::WebhookPayload;

/// Signature header accepted when the body carries none.
pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

/// POST /webhooks/payment
pub async fn receive_payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(mut payload): Json<WebhookPayload>,
) -> Result<Json<WebhookAck>, ApiError> {
    if payload.signature.is_none() {
        payload.signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|h| h.to_str().ok())
            .map(str::to_string);
    }

    let intent_id = payload.intent_id.clone();
    info!(intent_id = %intent_id, status = %payload.status, "POST /webhooks/payment");

    let result = state
        .engine
        .ingest_webhook(payload)
        .await
        .map_err(|e| ApiError::from(e).with_intent(intent_id.clone()))?;

    Ok(Json(WebhookAck {
        received: true,
        intent_id,
        outcome: result.outcome,
    }))
}
