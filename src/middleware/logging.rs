//! Request and response logging middleware
//!
//! Captures method, matched path, status, duration and request ID for every
//! HTTP request. Also provides wrappers that time store queries and outbound
//! gateway calls.

use axum::{
    extract::{MatchedPath, Request},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use std::time::Instant;
use tower_http::request_id::{MakeRequestId, RequestId};
use tracing::{info, warn, Instrument};
use uuid::Uuid;

/// Generate request IDs using UUIDv4
#[derive(Clone, Default)]
pub struct UuidRequestId;

impl MakeRequestId for UuidRequestId {
    fn make_request_id<B>(&mut self, _request: &http::Request<B>) -> Option<RequestId> {
        let id = Uuid::new_v4().to_string();
        Some(RequestId::new(id.parse().ok()?))
    }
}

/// Log each request and its outcome. Requests slower than 200ms are logged
/// at WARN, 5xx at ERROR, 4xx at WARN.
pub async fn request_logging_middleware(
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let start = Instant::now();

    let method = request.method().clone();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        "Request started"
    );

    let span = tracing::info_span!(
        "http_request",
        request_id = %request_id,
        method = %method,
        path = %path,
    );
    let response = next.run(request).instrument(span).await;

    let duration_ms = start.elapsed().as_millis();
    let status = response.status();

    if duration_ms > 200 {
        warn!(
            request_id = %request_id,
            method = %method,
            path = %path,
            status = status.as_u16(),
            duration_ms = %duration_ms,
            "Slow request completed"
        );
    } else if status.is_server_error() {
        tracing::error!(
            request_id = %request_id,
            method = %method,
            path = %path,
            status = status.as_u16(),
            duration_ms = %duration_ms,
            "Request failed with server error"
        );
    } else if status.is_client_error() {
        warn!(
            request_id = %request_id,
            method = %method,
            path = %path,
            status = status.as_u16(),
            duration_ms = %duration_ms,
            "Request completed with client error"
        );
    } else {
        info!(
            request_id = %request_id,
            method = %method,
            path = %path,
            status = status.as_u16(),
            duration_ms = %duration_ms,
            "Request completed"
        );
    }

    Ok(response)
}

/// Time a store operation and log it; slow (>100ms) queries at WARN.
pub async fn log_database_query<F, T, E>(query: &str, operation: F) -> Result<T, E>
where
    F: std::future::Future<Output = Result<T, E>>,
{
    let start = Instant::now();

    tracing::debug!(
        event_type = "database_query_start",
        query = %query,
        "Executing database query"
    );

    let result = operation.await;
    let duration_ms = start.elapsed().as_millis();

    match &result {
        Ok(_) if duration_ms > 100 => {
            warn!(
                event_type = "slow_database_query",
                query = %query,
                duration_ms = %duration_ms,
                "Slow database query detected"
            );
        }
        Ok(_) => {
            tracing::debug!(
                event_type = "database_query_complete",
                query = %query,
                duration_ms = %duration_ms,
                "Database query completed"
            );
        }
        Err(_) => {
            tracing::error!(
                event_type = "database_query_error",
                query = %query,
                duration_ms = %duration_ms,
                "Database query failed"
            );
        }
    }

    result
}

/// Time an outbound call to the payment gateway and log the outcome.
pub async fn log_external_call<F, T, E>(service: &str, endpoint: &str, operation: F) -> Result<T, E>
where
    F: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let start = Instant::now();

    info!(
        event_type = "external_call_start",
        service = %service,
        endpoint = %endpoint,
        "Calling external service"
    );

    let result = operation.await;
    let duration_ms = start.elapsed().as_millis();

    match &result {
        Ok(_) => {
            info!(
                event_type = "external_call_complete",
                service = %service,
                endpoint = %endpoint,
                duration_ms = %duration_ms,
                "External service call completed"
            );
        }
        Err(e) => {
            tracing::error!(
                event_type = "external_call_error",
                service = %service,
                endpoint = %endpoint,
                duration_ms = %duration_ms,
                error = %e,
                "External service call failed"
            );
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, routing::get, Router};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_request_logging_middleware_passes_response_through() {
        async fn handler() -> &'static str {
            "ok"
        }

        let app: Router = Router::new()
            .route("/", get(handler))
            .layer(axum::middleware::from_fn(request_logging_middleware));

        let response = app
            .oneshot(http::Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_uuid_request_id() {
        let request = http::Request::builder().body(()).unwrap();
        let id = UuidRequestId.make_request_id(&request).unwrap();
        let value = id.header_value().to_str().unwrap();
        assert!(Uuid::parse_str(value).is_ok());
    }

    #[tokio::test]
    async fn test_log_database_query_returns_result() {
        let result = log_database_query("SELECT 1", async { Ok::<_, String>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_log_external_call_propagates_error() {
        let result: Result<(), String> =
            log_external_call("gateway", "GET /intents/x", async { Err("boom".to_string()) }).await;
        assert_eq!(result.unwrap_err(), "boom");
    }
}
