//! External payment gateway seam
//!
//! The gateway owns checkout; this crate only creates intents, reads their
//! status and verifies the webhooks it pushes back.

pub mod failover;
pub mod http;
pub mod mock;
pub mod signature;

use crate::domain::IntentStatus;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub use failover::{FailoverGateway, RetryPolicy};
pub use self::http::HttpGateway;
pub use mock::MockGateway;
pub use signature::{WebhookError, WebhookPayload, WebhookVerifier};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateIntentRequest {
    pub user_id: String,
    pub amount: Decimal,
    pub idempotency_key: String,
}

/// Gateway-side view of an intent, normalized from its wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayIntent {
    pub intent_id: String,
    pub status: IntentStatus,
    #[serde(default)]
    pub checkout_url: Option<String>,
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub raw_payload: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GatewayError {
    #[error("gateway request timed out: {0}")]
    Timeout(String),

    #[error("gateway network error: {0}")]
    Network(String),

    #[error("gateway server error (HTTP {status}): {message}")]
    Server { status: u16, message: String },

    #[error("gateway rejected request (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("gateway has no intent {0}")]
    NotFound(String),

    #[error("unreadable gateway response: {0}")]
    InvalidResponse(String),
}

impl GatewayError {
    /// Retrying the same request (or failing over) may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GatewayError::Timeout(_) | GatewayError::Network(_) | GatewayError::Server { .. }
        )
    }
}

#[async_trait::async_trait]
pub trait PaymentGateway: Send + Sync {
    fn name(&self) -> &str;

    /// Create (or, for a repeated idempotency key, return) a gateway intent.
    async fn create_intent(
        &self,
        request: &CreateIntentRequest,
    ) -> Result<GatewayIntent, GatewayError>;

    async fn get_intent(&self, intent_id: &str) -> Result<GatewayIntent, GatewayError>;
}
