//! Request and response bodies

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::{IntentStatus, PaymentIntent, Transaction, Wallet};
use crate::services::{ApplyOutcome, Reconciliation};

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionListQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionListResponse {
    pub user_id: String,
    pub transactions: Vec<Transaction>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseRequest {
    pub amount: Decimal,
    pub description: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseResponse {
    pub transaction: Transaction,
    pub wallet: Wallet,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTopUpRequest {
    pub amount: Decimal,
    pub idempotency_key: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmIntentRequest {
    pub amount: Decimal,
    #[serde(default)]
    pub operator: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundRequest {
    pub amount: Decimal,
    pub reason: String,
}

/// Top-up stage for UI rendering
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TopUpStage {
    AwaitingPayment,
    Processing,
    Credited,
    Failed,
    Cancelled,
    Expired,
}

impl From<IntentStatus> for TopUpStage {
    fn from(status: IntentStatus) -> Self {
        match status {
            IntentStatus::Created | IntentStatus::AwaitingPayment => TopUpStage::AwaitingPayment,
            IntentStatus::Processing => TopUpStage::Processing,
            IntentStatus::Succeeded => TopUpStage::Credited,
            IntentStatus::Failed => TopUpStage::Failed,
            IntentStatus::Cancelled => TopUpStage::Cancelled,
            IntentStatus::Expired => TopUpStage::Expired,
        }
    }
}

/// Top-up status as shown to the payer
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopUpResponse {
    pub intent_id: String,
    pub status: IntentStatus,
    pub stage: TopUpStage,
    pub message: String,
    pub amount: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkout_url: Option<String>,
    /// True while a client-observed negative outcome awaits the gateway.
    pub pending_confirmation: bool,
    /// True when the gateway could not be reached and the local record is shown.
    pub stale: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ApplyOutcome>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TopUpResponse {
    pub fn from_intent(intent: PaymentIntent) -> Self {
        let stage = TopUpStage::from(intent.status);
        let pending_confirmation = intent.provisional.is_some() && !intent.is_terminal();
        Self {
            message: stage_message(stage, intent.requested_amount, pending_confirmation),
            intent_id: intent.intent_id,
            status: intent.status,
            stage,
            amount: intent.requested_amount,
            checkout_url: intent.checkout_url,
            pending_confirmation,
            stale: false,
            outcome: None,
            created_at: intent.created_at,
            updated_at: intent.updated_at,
        }
    }
}

impl From<Reconciliation> for TopUpResponse {
    fn from(result: Reconciliation) -> Self {
        let stale = matches!(result.outcome, ApplyOutcome::Stale);
        let mut response = TopUpResponse::from_intent(result.intent);
        response.stale = stale;
        response.outcome = Some(result.outcome);
        response
    }
}

fn stage_message(stage: TopUpStage, amount: Decimal, pending_confirmation: bool) -> String {
    if pending_confirmation {
        return "Checking the payment with the gateway before closing this top-up.".to_string();
    }
    match stage {
        TopUpStage::AwaitingPayment => "Waiting for your payment to be confirmed.".to_string(),
        TopUpStage::Processing => "Payment received, waiting for the gateway to settle it.".to_string(),
        TopUpStage::Credited => format!("{} credits have been added to your wallet.", amount.round_dp(2)),
        TopUpStage::Failed => "Payment failed. No credits were added.".to_string(),
        TopUpStage::Cancelled => "Payment was cancelled. No credits were added.".to_string(),
        TopUpStage::Expired => "This top-up expired before payment was completed.".to_string(),
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookAck {
    pub received: bool,
    pub intent_id: String,
    pub outcome: ApplyOutcome,
}
