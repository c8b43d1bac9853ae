//! Caller identity and the admin guard
//!
//! The upstream auth layer sets `x-user-id`; admin routes additionally need
//! `x-admin-token` to match the configured token.

use axum::body::Body;
use axum::extract::{FromRequestParts, State};
use axum::http::request::Parts;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::warn;

use super::error::ApiError;
use crate::logging::mask_identifier;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";
pub const OPERATOR_HEADER: &str = "x-operator-id";

/// Authenticated wallet owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentUser(pub String);

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|h| h.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(ApiError::unauthenticated)?;
        Ok(CurrentUser(user_id.to_string()))
    }
}

pub async fn require_admin_token(
    State(expected): State<String>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let provided = request
        .headers()
        .get(ADMIN_TOKEN_HEADER)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("");

    if !tokens_match(provided, &expected) {
        let operator = request
            .headers()
            .get(OPERATOR_HEADER)
            .and_then(|h| h.to_str().ok())
            .unwrap_or("unknown");
        warn!(
            path = %request.uri().path(),
            operator = %mask_identifier(operator),
            "Rejected admin request"
        );
        return ApiError::forbidden().into_response();
    }

    next.run(request).await
}

/// Constant-time comparison via HMAC of both sides under a fixed key.
fn tokens_match(provided: &str, expected: &str) -> bool {
    if provided.is_empty() || expected.is_empty() {
        return false;
    }
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(b"admin-token") else {
        return false;
    };
    mac.update(expected.as_bytes());
    let expected_tag = mac.finalize().into_bytes();

    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(b"admin-token") else {
        return false;
    };
    mac.update(provided.as_bytes());
    mac.verify_slice(&expected_tag).is_ok()
}
