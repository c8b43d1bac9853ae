//! Error taxonomy for the ledger, tracker and reconciliation layers
//!
//! Four classes matter to callers:
//! - transient: gateway timeouts and network failures, retried internally
//! - idempotency conflicts: `AlreadyCredited` and duplicate events, which the
//!   engine turns into successes
//! - business rules: insufficient funds, amounts below the minimum
//! - integrity: unknown wallets, amount mismatches, bad webhook signatures

use crate::database::error::DatabaseError;
use crate::domain::AmountError;
use crate::gateway::signature::WebhookError;
use rust_decimal::Decimal;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("payment intent {intent_id} was already credited")]
    AlreadyCredited { intent_id: String },

    #[error("insufficient funds for {user_id}: available={available}, requested={requested}")]
    InsufficientFunds {
        user_id: String,
        available: Decimal,
        requested: Decimal,
    },

    #[error("wallet not found for user {0}")]
    WalletNotFound(String),

    #[error("balance overflow for user {0}")]
    BalanceOverflow(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(#[from] AmountError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl LedgerError {
    pub fn is_business_rule(&self) -> bool {
        matches!(self, LedgerError::InsufficientFunds { .. } | LedgerError::InvalidAmount(_))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("invalid amount: {0}")]
    InvalidAmount(#[from] AmountError),

    #[error("amount {requested} is below the minimum top-up of {minimum}")]
    BelowMinimum { minimum: Decimal, requested: Decimal },

    #[error("payment gateway unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("payment gateway rejected the request: {0}")]
    GatewayRejected(String),

    #[error("payment intent not found: {0}")]
    IntentNotFound(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl TrackerError {
    pub fn is_transient(&self) -> bool {
        matches!(self, TrackerError::GatewayUnavailable(_))
    }

    pub fn is_business_rule(&self) -> bool {
        matches!(self, TrackerError::InvalidAmount(_) | TrackerError::BelowMinimum { .. })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("payment intent not found: {0}")]
    IntentNotFound(String),

    #[error("amount mismatch for intent {intent_id}: expected={expected}, observed={observed}")]
    AmountMismatch {
        intent_id: String,
        expected: Decimal,
        observed: Decimal,
    },

    #[error("payment intent {0} changed underneath the reconciliation lock")]
    ConcurrentModification(String),

    #[error(transparent)]
    Webhook(#[from] WebhookError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Tracker(#[from] TrackerError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl ReconcileError {
    /// Failures that must never be retried blindly and always get logged loudly.
    pub fn is_integrity_violation(&self) -> bool {
        matches!(
            self,
            ReconcileError::AmountMismatch { .. }
                | ReconcileError::Webhook(_)
                | ReconcileError::Ledger(LedgerError::WalletNotFound(_))
        )
    }
}
