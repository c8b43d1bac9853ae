use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle of a top-up intent.
///
/// Non-terminal states only move forward (`CREATED → AWAITING_PAYMENT →
/// PROCESSING`). Terminal states never change once recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntentStatus {
    Created,
    AwaitingPayment,
    Processing,
    Succeeded,
    Failed,
    Cancelled,
    Expired,
}

impl IntentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentStatus::Created => "CREATED",
            IntentStatus::AwaitingPayment => "AWAITING_PAYMENT",
            IntentStatus::Processing => "PROCESSING",
            IntentStatus::Succeeded => "SUCCEEDED",
            IntentStatus::Failed => "FAILED",
            IntentStatus::Cancelled => "CANCELLED",
            IntentStatus::Expired => "EXPIRED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            IntentStatus::Succeeded
                | IntentStatus::Failed
                | IntentStatus::Cancelled
                | IntentStatus::Expired
        )
    }

    /// FAILED or CANCELLED: a terminal outcome that moves no money.
    pub fn is_negative(&self) -> bool {
        matches!(self, IntentStatus::Failed | IntentStatus::Cancelled)
    }

    /// Position along the forward path; terminal states share the top rank.
    pub fn rank(&self) -> u8 {
        match self {
            IntentStatus::Created => 0,
            IntentStatus::AwaitingPayment => 1,
            IntentStatus::Processing => 2,
            _ => 3,
        }
    }
}

impl fmt::Display for IntentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntentStatus {
    type Err = String;

    /// Case-insensitive; gateways are not consistent about casing.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CREATED" => Ok(IntentStatus::Created),
            "AWAITING_PAYMENT" => Ok(IntentStatus::AwaitingPayment),
            "PROCESSING" => Ok(IntentStatus::Processing),
            "SUCCEEDED" => Ok(IntentStatus::Succeeded),
            "FAILED" => Ok(IntentStatus::Failed),
            "CANCELLED" | "CANCELED" => Ok(IntentStatus::Cancelled),
            "EXPIRED" => Ok(IntentStatus::Expired),
            other => Err(format!("unknown intent status: {}", other)),
        }
    }
}

/// Client-observed negative outcome held until the gateway confirms it or the
/// settle window passes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionalOutcome {
    pub status: IntentStatus,
    pub observed_at: DateTime<Utc>,
}

/// Local shadow of a gateway payment intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentIntent {
    pub intent_id: String,
    pub user_id: String,
    pub requested_amount: Decimal,
    pub status: IntentStatus,
    pub idempotency_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkout_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_gateway_payload: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provisional: Option<ProvisionalOutcome>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentIntent {
    pub fn new(
        intent_id: impl Into<String>,
        user_id: impl Into<String>,
        requested_amount: Decimal,
        idempotency_key: impl Into<String>,
        checkout_url: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            intent_id: intent_id.into(),
            user_id: user_id.into(),
            requested_amount,
            status: IntentStatus::Created,
            idempotency_key: idempotency_key.into(),
            checkout_url,
            raw_gateway_payload: None,
            provisional: None,
            created_at,
            updated_at: created_at,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
