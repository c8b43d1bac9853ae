//! Ledger store: wallets plus the append-only transaction log
//!
//! Every balance change and its transaction row are written as one unit. The
//! at-most-one-deposit-per-intent guard lives here as well as in the
//! reconciliation engine; the engine treats `AlreadyCredited` as success.

use crate::domain::{normalize_amount, Transaction, Wallet};
use crate::error::LedgerError;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{debug, warn};

#[async_trait]
pub trait LedgerRepository: Send + Sync {
    /// Credit `amount` for a settled intent. Fails with `AlreadyCredited` when a
    /// deposit for `intent_id` already exists. Creates the wallet on first deposit.
    async fn append_deposit(
        &self,
        user_id: &str,
        amount: Decimal,
        intent_id: &str,
    ) -> Result<Transaction, LedgerError>;

    /// Debit `amount`. Fails with `InsufficientFunds` without touching state
    /// when the balance is too low.
    async fn append_debit(
        &self,
        user_id: &str,
        amount: Decimal,
        reason: &str,
    ) -> Result<Transaction, LedgerError>;

    /// Credit back a previous purchase as a new REFUND row.
    async fn append_refund(
        &self,
        user_id: &str,
        amount: Decimal,
        reason: &str,
    ) -> Result<Transaction, LedgerError>;

    async fn get_wallet(&self, user_id: &str) -> Result<Wallet, LedgerError>;

    /// Get the wallet, provisioning an empty one on first lookup.
    async fn open_wallet(&self, user_id: &str) -> Result<Wallet, LedgerError>;

    /// Newest first.
    async fn list_transactions(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<Transaction>, LedgerError>;

    async fn find_deposit(&self, intent_id: &str) -> Result<Option<Transaction>, LedgerError>;
}

#[derive(Default)]
struct LedgerState {
    wallets: HashMap<String, Wallet>,
    transactions: Vec<Transaction>,
    /// intent_id -> index into `transactions`
    deposits_by_intent: HashMap<String, usize>,
}

impl LedgerState {
    fn credit(&mut self, tx: Transaction) -> Result<Transaction, LedgerError> {
        let wallet = self
            .wallets
            .entry(tx.user_id.clone())
            .or_insert_with(|| Wallet::new(tx.user_id.clone()));

        let new_balance = wallet.balance.checked_add(tx.amount).ok_or_else(|| {
            warn!(user_id = %tx.user_id, amount = %tx.amount, "Balance overflow rejected");
            LedgerError::BalanceOverflow(tx.user_id.clone())
        })?;

        wallet.balance = new_balance;
        wallet.version += 1;

        if let Some(intent_id) = &tx.related_intent_id {
            self.deposits_by_intent
                .insert(intent_id.clone(), self.transactions.len());
        }
        self.transactions.push(tx.clone());
        Ok(tx)
    }
}

/// Ledger held in process memory. One mutex covers wallets and rows so each
/// append is all-or-nothing, the way a single SQL transaction would be.
#[derive(Default)]
pub struct InMemoryLedger {
    state: Mutex<LedgerState>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerRepository for InMemoryLedger {
    async fn append_deposit(
        &self,
        user_id: &str,
        amount: Decimal,
        intent_id: &str,
    ) -> Result<Transaction, LedgerError> {
        let amount = normalize_amount(amount)?;
        let mut state = self.state.lock().await;

        if state.deposits_by_intent.contains_key(intent_id) {
            debug!(intent_id = %intent_id, "Deposit already recorded for intent");
            return Err(LedgerError::AlreadyCredited {
                intent_id: intent_id.to_string(),
            });
        }

        state.credit(Transaction::deposit(user_id, amount, intent_id))
    }

    async fn append_debit(
        &self,
        user_id: &str,
        amount: Decimal,
        reason: &str,
    ) -> Result<Transaction, LedgerError> {
        let amount = normalize_amount(amount)?;
        let mut state = self.state.lock().await;

        let wallet = state
            .wallets
            .get_mut(user_id)
            .ok_or_else(|| LedgerError::WalletNotFound(user_id.to_string()))?;

        if wallet.balance < amount {
            return Err(LedgerError::InsufficientFunds {
                user_id: user_id.to_string(),
                available: wallet.balance,
                requested: amount,
            });
        }

        wallet.balance -= amount;
        wallet.version += 1;

        let tx = Transaction::purchase(user_id, amount, reason);
        state.transactions.push(tx.clone());
        Ok(tx)
    }

    async fn append_refund(
        &self,
        user_id: &str,
        amount: Decimal,
        reason: &str,
    ) -> Result<Transaction, LedgerError> {
        let amount = normalize_amount(amount)?;
        let mut state = self.state.lock().await;

        if !state.wallets.contains_key(user_id) {
            return Err(LedgerError::WalletNotFound(user_id.to_string()));
        }

        state.credit(Transaction::refund(user_id, amount, reason))
    }

    async fn get_wallet(&self, user_id: &str) -> Result<Wallet, LedgerError> {
        self.state
            .lock()
            .await
            .wallets
            .get(user_id)
            .cloned()
            .ok_or_else(|| LedgerError::WalletNotFound(user_id.to_string()))
    }

    async fn open_wallet(&self, user_id: &str) -> Result<Wallet, LedgerError> {
        let mut state = self.state.lock().await;
        Ok(state
            .wallets
            .entry(user_id.to_string())
            .or_insert_with(|| Wallet::new(user_id))
            .clone())
    }

    async fn list_transactions(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<Transaction>, LedgerError> {
        let state = self.state.lock().await;
        Ok(state
            .transactions
            .iter()
            .rev()
            .filter(|tx| tx.user_id == user_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn find_deposit(&self, intent_id: &str) -> Result<Option<Transaction>, LedgerError> {
        let state = self.state.lock().await;
        Ok(state
            .deposits_by_intent
            .get(intent_id)
            .and_then(|idx| state.transactions.get(*idx))
            .cloned())
    }
}
