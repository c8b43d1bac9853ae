//! Wallet Service: the write boundary in front of the ledger
//!
//! `credit` is reserved for the reconciliation engine; purchase and refund
//! flows go through `debit` and `refund`.

use crate::database::ledger_repository::LedgerRepository;
use crate::domain::{Transaction, Wallet};
use crate::error::LedgerError;
use crate::logging::mask_identifier;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Maximum rows returned by a history lookup.
pub const MAX_HISTORY: usize = 200;

#[derive(Debug, Clone, PartialEq)]
pub enum CreditOutcome {
    Credited(Transaction),
    /// A deposit for this intent already exists; nothing was written.
    AlreadyCredited,
}

pub struct WalletService {
    ledger: Arc<dyn LedgerRepository>,
}

impl WalletService {
    pub fn new(ledger: Arc<dyn LedgerRepository>) -> Self {
        Self { ledger }
    }

    /// Deposit for a settled intent. The intent id is the idempotency key:
    /// a repeat is reported as `AlreadyCredited`, never as an error.
    #[instrument(skip(self), fields(service = "wallet"))]
    pub async fn credit(
        &self,
        user_id: &str,
        amount: Decimal,
        intent_id: &str,
    ) -> Result<CreditOutcome, LedgerError> {
        match self.ledger.append_deposit(user_id, amount, intent_id).await {
            Ok(tx) => {
                crate::log_transaction!(
                    event = "wallet_deposit",
                    user_id = mask_identifier(user_id),
                    amount = tx.amount,
                    intent_id = intent_id,
                    transaction_id = tx.transaction_id,
                );
                Ok(CreditOutcome::Credited(tx))
            }
            Err(LedgerError::AlreadyCredited { .. }) => {
                debug!(intent_id = %intent_id, "Deposit already present, treating as success");
                Ok(CreditOutcome::AlreadyCredited)
            }
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self), fields(service = "wallet"))]
    pub async fn debit(
        &self,
        user_id: &str,
        amount: Decimal,
        reason: &str,
    ) -> Result<Transaction, LedgerError> {
        let tx = self
            .ledger
            .append_debit(user_id, amount, reason)
            .await
            .inspect_err(|e| {
                if !e.is_business_rule() {
                    warn!(user_id = %mask_identifier(user_id), error = %e, "Debit failed");
                }
            })?;

        crate::log_transaction!(
            event = "wallet_purchase",
            user_id = mask_identifier(user_id),
            amount = tx.amount,
            transaction_id = tx.transaction_id,
        );
        Ok(tx)
    }

    #[instrument(skip(self), fields(service = "wallet"))]
    pub async fn refund(
        &self,
        user_id: &str,
        amount: Decimal,
        reason: &str,
    ) -> Result<Transaction, LedgerError> {
        let tx = self.ledger.append_refund(user_id, amount, reason).await?;
        crate::log_transaction!(
            event = "wallet_refund",
            user_id = mask_identifier(user_id),
            amount = tx.amount,
            transaction_id = tx.transaction_id,
        );
        Ok(tx)
    }

    /// Read-only balance lookup.
    pub async fn get_balance(&self, user_id: &str) -> Result<Decimal, LedgerError> {
        Ok(self.ledger.get_wallet(user_id).await?.balance)
    }

    /// Wallet for display, provisioned on first lookup.
    pub async fn wallet(&self, user_id: &str) -> Result<Wallet, LedgerError> {
        self.ledger.open_wallet(user_id).await
    }

    pub async fn transactions(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<Transaction>, LedgerError> {
        self.ledger
            .list_transactions(user_id, limit.clamp(1, MAX_HISTORY))
            .await
    }

    pub async fn deposit_for_intent(
        &self,
        intent_id: &str,
    ) -> Result<Option<Transaction>, LedgerError> {
        self.ledger.find_deposit(intent_id).await
    }
}
