use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Per-user wallet. `balance` is only ever changed by the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Wallet {
    pub user_id: String,
    pub balance: Decimal,
    pub version: i64,
}

impl Wallet {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            balance: Decimal::new(0, 2),
            version: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Deposit,
    Purchase,
    Refund,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Deposit => "DEPOSIT",
            TransactionType::Purchase => "PURCHASE",
            TransactionType::Refund => "REFUND",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DEPOSIT" => Ok(TransactionType::Deposit),
            "PURCHASE" => Ok(TransactionType::Purchase),
            "REFUND" => Ok(TransactionType::Refund),
            other => Err(format!("unknown transaction type: {}", other)),
        }
    }
}

/// Immutable ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub transaction_id: Uuid,
    pub user_id: String,
    #[serde(rename = "type")]
    pub tx_type: TransactionType,
    pub amount: Decimal,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_intent_id: Option<String>,
    pub description: String,
}

impl Transaction {
    pub fn deposit(user_id: &str, amount: Decimal, intent_id: &str) -> Self {
        Self {
            transaction_id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            tx_type: TransactionType::Deposit,
            amount,
            timestamp: Utc::now(),
            related_intent_id: Some(intent_id.to_string()),
            description: format!("Top-up via payment intent {}", intent_id),
        }
    }

    pub fn purchase(user_id: &str, amount: Decimal, reason: &str) -> Self {
        Self {
            transaction_id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            tx_type: TransactionType::Purchase,
            amount,
            timestamp: Utc::now(),
            related_intent_id: None,
            description: reason.to_string(),
        }
    }

    pub fn refund(user_id: &str, amount: Decimal, reason: &str) -> Self {
        Self {
            transaction_id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            tx_type: TransactionType::Refund,
            amount,
            timestamp: Utc::now(),
            related_intent_id: None,
            description: reason.to_string(),
        }
    }
}
