//! Core wallet, intent and reconciliation types

pub mod amount;
pub mod event;
pub mod intent;
pub mod wallet;

pub use amount::{format_amount, normalize_amount, AmountError};
pub use event::{EventSource, ReconciliationEvent};
pub use intent::{IntentStatus, PaymentIntent, ProvisionalOutcome};
pub use wallet::{Transaction, TransactionType, Wallet};
