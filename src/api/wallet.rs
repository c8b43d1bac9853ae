//! Wallet endpoints: balance, history and purchases

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use tracing::info;

use super::auth::CurrentUser;
use super::error::ApiError;
use super::models::{PurchaseRequest, PurchaseResponse, TransactionListQuery, TransactionListResponse};
use super::AppState;
use crate::domain::Wallet;
use crate::logging::mask_identifier;

const DEFAULT_HISTORY_LIMIT: usize = 50;

/// GET /wallet
pub async fn get_wallet(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
) -> Result<Json<Wallet>, ApiError> {
    Ok(Json(state.wallet.wallet(&user_id).await?))
}

/// GET /wallet/transactions
pub async fn list_transactions(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Query(query): Query<TransactionListQuery>,
) -> Result<Json<TransactionListResponse>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    let transactions = state.wallet.transactions(&user_id, limit).await?;
    Ok(Json(TransactionListResponse {
        user_id,
        transactions,
    }))
}

/// POST /wallet/purchases
pub async fn create_purchase(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Json(request): Json<PurchaseRequest>,
) -> Result<(StatusCode, Json<PurchaseResponse>), ApiError> {
    let description = request.description.trim();
    if description.is_empty() {
        return Err(ApiError::bad_request("description is required"));
    }

    info!(user = %mask_identifier(&user_id), amount = %request.amount, "POST /wallet/purchases");
    // A first-time player gets an empty wallet and a 402, not a 404.
    state.wallet.wallet(&user_id).await?;
    let transaction = state
        .wallet
        .debit(&user_id, request.amount, description)
        .await?;
    let wallet = state.wallet.wallet(&user_id).await?;

    Ok((
        StatusCode::CREATED,
        Json(PurchaseResponse {
            transaction,
            wallet,
        }),
    ))
}
