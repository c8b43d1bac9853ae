use super::{CreateIntentRequest, GatewayError, GatewayIntent, PaymentGateway};
use crate::domain::IntentStatus;
use crate::logging::{redact_payload, redact_sensitive_data};
use crate::middleware::logging::log_external_call;
use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Wire shape shared by `POST /payment-intents` and `GET /payment-intents/{id}`.
/// Status is parsed leniently since gateways disagree on casing.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IntentResponse {
    intent_id: String,
    status: String,
    #[serde(default)]
    checkout_url: Option<String>,
    #[serde(default)]
    amount: Option<Decimal>,
    #[serde(default)]
    raw_payload: Option<serde_json::Value>,
}

pub struct HttpGateway {
    name: String,
    base_url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl HttpGateway {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
            client: reqwest::Client::new(),
        }
    }

    async fn read_intent(&self, response: reqwest::Response) -> Result<GatewayIntent, GatewayError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let body: String = redact_sensitive_data(&body).chars().take(200).collect();
            return Err(match status {
                StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
                    GatewayError::Timeout(format!("HTTP {}", status.as_u16()))
                }
                s if s.is_server_error() || s == StatusCode::TOO_MANY_REQUESTS => {
                    GatewayError::Server { status: s.as_u16(), message: body }
                }
                s => GatewayError::Rejected { status: s.as_u16(), message: body },
            });
        }

        let wire: IntentResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;
        if let Some(raw) = &wire.raw_payload {
            debug!(gateway = %self.name, payload = %redact_payload(raw), "Gateway intent payload");
        }
        let intent_status = wire
            .status
            .parse::<IntentStatus>()
            .map_err(GatewayError::InvalidResponse)?;

        Ok(GatewayIntent {
            intent_id: wire.intent_id,
            status: intent_status,
            checkout_url: wire.checkout_url,
            amount: wire.amount,
            raw_payload: wire.raw_payload,
        })
    }
}

fn transport_error(err: reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        GatewayError::Timeout(err.to_string())
    } else {
        GatewayError::Network(err.to_string())
    }
}

#[async_trait::async_trait]
impl PaymentGateway for HttpGateway {
    fn name(&self) -> &str {
        &self.name
    }

    async fn create_intent(
        &self,
        request: &CreateIntentRequest,
    ) -> Result<GatewayIntent, GatewayError> {
        let url = format!("{}/payment-intents", self.base_url);

        log_external_call(&self.name, "POST /payment-intents", async {
            let response = self
                .client
                .post(&url)
                .header("Idempotency-Key", &request.idempotency_key)
                .json(request)
                .timeout(self.timeout)
                .send()
                .await
                .map_err(transport_error)?;
            self.read_intent(response).await
        })
        .await
    }

    async fn get_intent(&self, intent_id: &str) -> Result<GatewayIntent, GatewayError> {
        let url = format!("{}/payment-intents/{}", self.base_url, intent_id);

        log_external_call(&self.name, "GET /payment-intents/{intentId}", async {
            let response = self
                .client
                .get(&url)
                .timeout(self.timeout)
                .send()
                .await
                .map_err(transport_error)?;
            if response.status() == StatusCode::NOT_FOUND {
                return Err(GatewayError::NotFound(intent_id.to_string()));
            }
            self.read_intent(response).await
        })
        .await
    }
}
