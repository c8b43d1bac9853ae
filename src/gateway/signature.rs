//! Webhook signature verification
//!
//! `signature = hex(HMAC-SHA256(secret, "{intentId}:{status}:{amount}"))` with
//! the amount rendered to exactly two fraction digits. Nothing in a webhook is
//! trusted until this check passes. Amounts finer than a centavo cannot be
//! signed unambiguously and are refused before the check.

use crate::domain::{format_amount, normalize_amount, AmountError, IntentStatus, ReconciliationEvent};
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    pub intent_id: String,
    pub status: String,
    pub amount: Decimal,
    #[serde(default)]
    pub signature: Option<String>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WebhookError {
    #[error("webhook signature missing")]
    MissingSignature,

    #[error("webhook signature invalid")]
    InvalidSignature,

    #[error("malformed webhook: {0}")]
    Malformed(String),

    #[error("webhook amount rejected: {0}")]
    InvalidAmount(#[from] AmountError),
}

#[derive(Clone)]
pub struct WebhookVerifier {
    secret: Vec<u8>,
}

impl WebhookVerifier {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
        }
    }

    fn mac(&self, intent_id: &str, status: &str, amount: Decimal) -> Result<HmacSha256, WebhookError> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| WebhookError::Malformed(format!("webhook secret: {}", e)))?;
        mac.update(format!("{}:{}:{}", intent_id, status, format_amount(amount)).as_bytes());
        Ok(mac)
    }

    /// Hex signature the gateway is expected to send for these fields.
    pub fn sign(&self, intent_id: &str, status: &str, amount: Decimal) -> Result<String, WebhookError> {
        let mac = self.mac(intent_id, status, amount)?;
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Constant-time check of the payload's signature.
    pub fn verify(&self, payload: &WebhookPayload) -> Result<(), WebhookError> {
        let signature = payload
            .signature
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(WebhookError::MissingSignature)?;
        let expected = hex::decode(signature).map_err(|_| WebhookError::InvalidSignature)?;

        self.mac(&payload.intent_id, &payload.status, payload.amount)?
            .verify_slice(&expected)
            .map_err(|_| WebhookError::InvalidSignature)
    }

    /// Verify, then turn the payload into a WEBHOOK reconciliation event.
    pub fn verified_event(&self, payload: WebhookPayload) -> Result<ReconciliationEvent, WebhookError> {
        normalize_amount(payload.amount)?;
        self.verify(&payload)?;

        let status = payload
            .status
            .parse::<IntentStatus>()
            .map_err(WebhookError::Malformed)?;
        let raw = serde_json::json!({
            "intentId": payload.intent_id,
            "status": payload.status,
            "amount": payload.amount,
        });

        Ok(ReconciliationEvent::webhook(payload.intent_id, status, payload.amount).with_raw_payload(raw))
    }
}
