//! Top-up endpoints
//!
//! Creating an intent hands back the checkout URL. Status reads double as the
//! client polling channel: each read asks the gateway and reconciles.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use tracing::{debug, info};

use super::auth::CurrentUser;
use super::error::ApiError;
use super::models::{CreateTopUpRequest, TopUpResponse};
use super::AppState;
use crate::domain::PaymentIntent;
use crate::logging::mask_identifier;
use crate::monitor::Outcome;

const MAX_IDEMPOTENCY_KEY_LEN: usize = 128;

/// POST /wallet/top-ups
pub async fn create_top_up(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Json(request): Json<CreateTopUpRequest>,
) -> Result<(StatusCode, Json<TopUpResponse>), ApiError> {
    let key = request.idempotency_key.trim();
    if key.is_empty() || key.len() > MAX_IDEMPOTENCY_KEY_LEN {
        return Err(ApiError::bad_request(format!(
            "idempotencyKey must be 1-{} characters",
            MAX_IDEMPOTENCY_KEY_LEN
        )));
    }

    info!(user = %mask_identifier(&user_id), amount = %request.amount, "POST /wallet/top-ups");
    let intent = state
        .tracker
        .create_intent(&user_id, request.amount, key)
        .await?;

    Ok((StatusCode::CREATED, Json(TopUpResponse::from_intent(intent))))
}

/// GET /wallet/top-ups/{intent_id}
pub async fn get_top_up(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(intent_id): Path<String>,
) -> Result<Json<TopUpResponse>, ApiError> {
    owned_intent(&state, &user_id, &intent_id).await?;

    let result = state.engine.poll_gateway(&intent_id).await?;
    debug!(intent_id = %intent_id, outcome = ?result.outcome, "Client poll reconciled");
    Ok(Json(result.into()))
}

/// POST /wallet/top-ups/{intent_id}/client-report
pub async fn report_client_outcome(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(intent_id): Path<String>,
    Json(outcome): Json<Outcome>,
) -> Result<Json<TopUpResponse>, ApiError> {
    owned_intent(&state, &user_id, &intent_id).await?;

    info!(intent_id = %intent_id, outcome = %outcome, "Checkout monitor reported");
    let result = state
        .engine
        .report_client_outcome(&intent_id, &outcome)
        .await?;
    Ok(Json(result.into()))
}

/// Someone else's intent is reported as missing.
async fn owned_intent(
    state: &AppState,
    user_id: &str,
    intent_id: &str,
) -> Result<PaymentIntent, ApiError> {
    let intent = state.tracker.get_intent(intent_id).await?;
    if intent.user_id != user_id {
        return Err(
            ApiError::not_found(format!("payment intent not found: {}", intent_id))
                .with_intent(intent_id),
        );
    }
    Ok(intent)
}
