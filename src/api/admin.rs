//! Operator endpoints, mounted behind the admin token guard

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use tracing::info;

use super::auth::OPERATOR_HEADER;
use super::error::ApiError;
use super::models::{ConfirmIntentRequest, RefundRequest, TopUpResponse};
use super::AppState;
use crate::domain::Transaction;
use crate::logging::mask_identifier;

/// POST /admin/payment-intents/{intent_id}/confirm
pub async fn confirm_intent(
    State(state): State<AppState>,
    Path(intent_id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<ConfirmIntentRequest>,
) -> Result<Json<TopUpResponse>, ApiError> {
    let operator = request
        .operator
        .clone()
        .or_else(|| operator_from(&headers))
        .unwrap_or_else(|| "admin".to_string());

    let result = state
        .engine
        .confirm_manually(&intent_id, request.amount, &operator)
        .await?;
    Ok(Json(result.into()))
}

/// POST /admin/wallets/{user_id}/refunds
pub async fn refund_wallet(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<RefundRequest>,
) -> Result<(StatusCode, Json<Transaction>), ApiError> {
    let reason = request.reason.trim();
    if reason.is_empty() {
        return Err(ApiError::bad_request("reason is required"));
    }

    info!(
        user = %mask_identifier(&user_id),
        amount = %request.amount,
        operator = ?operator_from(&headers),
        "Refund requested"
    );
    let tx = state.wallet.refund(&user_id, request.amount, reason).await?;
    Ok((StatusCode::CREATED, Json(tx)))
}

fn operator_from(headers: &HeaderMap) -> Option<String> {
    headers
        .get(OPERATOR_HEADER)
        .and_then(|h| h.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
