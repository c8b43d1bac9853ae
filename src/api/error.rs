//! HTTP error mapping
//!
//! Every handler returns `ApiError`, rendered as
//! `{"error": {"code", "message", "intent_id"?, "retry_after"?}}`.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::error;

use crate::error::{LedgerError, ReconcileError, TrackerError};
use crate::gateway::WebhookError;

/// Seconds a client should wait before retrying a transient failure.
const GATEWAY_RETRY_AFTER_SECS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidRequest,
    InvalidAmount,
    BelowMinimum,
    InsufficientFunds,
    Unauthenticated,
    InvalidSignature,
    Forbidden,
    NotFound,
    AmountMismatch,
    Conflict,
    GatewayUnavailable,
    GatewayRejected,
    InternalError,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: ErrorCode,
    message: String,
    intent_id: Option<String>,
    retry_after: Option<u64>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            intent_id: None,
            retry_after: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, ErrorCode::InvalidRequest, message)
    }

    pub fn unauthenticated() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            ErrorCode::Unauthenticated,
            "missing or empty x-user-id header",
        )
    }

    pub fn forbidden() -> Self {
        Self::new(StatusCode::FORBIDDEN, ErrorCode::Forbidden, "admin token required")
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, ErrorCode::NotFound, message)
    }

    fn internal(source: &dyn std::fmt::Display) -> Self {
        error!(error = %source, "Internal error while handling request");
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::InternalError,
            "internal error",
        )
    }

    pub fn with_intent(mut self, intent_id: impl Into<String>) -> Self {
        self.intent_id = Some(intent_id.into());
        self
    }

    pub fn with_retry_after(mut self, secs: u64) -> Self {
        self.retry_after = Some(secs);
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let retry_after = self.retry_after;
        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
                intent_id: self.intent_id,
                retry_after,
            },
        };

        let mut response = (self.status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        match &err {
            LedgerError::InsufficientFunds { .. } => Self::new(
                StatusCode::PAYMENT_REQUIRED,
                ErrorCode::InsufficientFunds,
                err.to_string(),
            ),
            LedgerError::InvalidAmount(_) => {
                Self::new(StatusCode::BAD_REQUEST, ErrorCode::InvalidAmount, err.to_string())
            }
            LedgerError::BalanceOverflow(_) => Self::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorCode::InvalidAmount,
                err.to_string(),
            ),
            LedgerError::WalletNotFound(_) => Self::not_found(err.to_string()),
            LedgerError::AlreadyCredited { intent_id } => {
                Self::new(StatusCode::CONFLICT, ErrorCode::Conflict, err.to_string())
                    .with_intent(intent_id.clone())
            }
            LedgerError::Database(_) => Self::internal(&err),
        }
    }
}

impl From<TrackerError> for ApiError {
    fn from(err: TrackerError) -> Self {
        match &err {
            TrackerError::InvalidAmount(_) => {
                Self::new(StatusCode::BAD_REQUEST, ErrorCode::InvalidAmount, err.to_string())
            }
            TrackerError::BelowMinimum { .. } => Self::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorCode::BelowMinimum,
                err.to_string(),
            ),
            TrackerError::GatewayUnavailable(_) => Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorCode::GatewayUnavailable,
                "payment gateway is temporarily unavailable",
            )
            .with_retry_after(GATEWAY_RETRY_AFTER_SECS),
            TrackerError::GatewayRejected(_) => {
                Self::new(StatusCode::BAD_GATEWAY, ErrorCode::GatewayRejected, err.to_string())
            }
            TrackerError::IntentNotFound(id) => {
                Self::not_found(err.to_string()).with_intent(id.clone())
            }
            TrackerError::Database(_) => Self::internal(&err),
        }
    }
}

impl From<WebhookError> for ApiError {
    fn from(err: WebhookError) -> Self {
        match err {
            WebhookError::Malformed(_) => Self::bad_request(err.to_string()),
            WebhookError::InvalidAmount(_) => {
                Self::new(StatusCode::BAD_REQUEST, ErrorCode::InvalidAmount, err.to_string())
            }
            WebhookError::MissingSignature | WebhookError::InvalidSignature => Self::new(
                StatusCode::UNAUTHORIZED,
                ErrorCode::InvalidSignature,
                err.to_string(),
            ),
        }
    }
}

impl From<ReconcileError> for ApiError {
    fn from(err: ReconcileError) -> Self {
        match err {
            ReconcileError::IntentNotFound(ref id) => {
                let id = id.clone();
                Self::not_found(err.to_string()).with_intent(id)
            }
            ReconcileError::AmountMismatch { ref intent_id, .. } => {
                let id = intent_id.clone();
                Self::new(StatusCode::CONFLICT, ErrorCode::AmountMismatch, err.to_string())
                    .with_intent(id)
            }
            ReconcileError::ConcurrentModification(ref id) => {
                let id = id.clone();
                Self::new(StatusCode::CONFLICT, ErrorCode::Conflict, err.to_string())
                    .with_intent(id)
                    .with_retry_after(1)
            }
            ReconcileError::Webhook(e) => e.into(),
            ReconcileError::Ledger(e) => e.into(),
            ReconcileError::Tracker(e) => e.into(),
            ReconcileError::Database(_) => Self::internal(&err),
        }
    }
}
