use super::intent::IntentStatus;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Channel a status observation arrived through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventSource {
    ClientPoll,
    Webhook,
    ManualAdmin,
}

impl EventSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventSource::ClientPoll => "CLIENT_POLL",
            EventSource::Webhook => "WEBHOOK",
            EventSource::ManualAdmin => "MANUAL_ADMIN",
        }
    }
}

impl fmt::Display for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single status observation fed into the reconciliation engine.
///
/// Carries no authority on its own; the engine decides what it means against
/// the persisted intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationEvent {
    pub source: EventSource,
    pub intent_id: String,
    pub observed_status: IntentStatus,
    pub observed_at: DateTime<Utc>,
    /// Amount the observer claims was paid, when it reports one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<Decimal>,
    /// True when the observation comes from the client device (redirect
    /// monitor) rather than from the gateway or an operator.
    #[serde(default)]
    pub reported_by_client: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_payload: Option<serde_json::Value>,
}

impl ReconciliationEvent {
    pub fn new(source: EventSource, intent_id: impl Into<String>, observed_status: IntentStatus) -> Self {
        Self {
            source,
            intent_id: intent_id.into(),
            observed_status,
            observed_at: Utc::now(),
            amount: None,
            reported_by_client: false,
            raw_payload: None,
        }
    }

    /// Gateway status obtained by polling on behalf of the client.
    pub fn gateway_poll(intent_id: impl Into<String>, observed_status: IntentStatus) -> Self {
        Self::new(EventSource::ClientPoll, intent_id, observed_status)
    }

    /// Outcome classified on the client device by the redirect monitor.
    pub fn client_report(intent_id: impl Into<String>, observed_status: IntentStatus) -> Self {
        Self {
            reported_by_client: true,
            ..Self::new(EventSource::ClientPoll, intent_id, observed_status)
        }
    }

    pub fn webhook(intent_id: impl Into<String>, observed_status: IntentStatus, amount: Decimal) -> Self {
        Self {
            amount: Some(amount),
            ..Self::new(EventSource::Webhook, intent_id, observed_status)
        }
    }

    pub fn manual_confirm(intent_id: impl Into<String>, amount: Decimal) -> Self {
        Self {
            amount: Some(amount),
            ..Self::new(EventSource::ManualAdmin, intent_id, IntentStatus::Succeeded)
        }
    }

    pub fn with_amount(mut self, amount: Decimal) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn with_raw_payload(mut self, payload: serde_json::Value) -> Self {
        self.raw_payload = Some(payload);
        self
    }
}
