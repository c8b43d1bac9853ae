//! Wallet, intent tracking and reconciliation services

pub mod intent_locks;
pub mod intent_tracker;
pub mod reconciliation;
pub mod state_machine;
pub mod wallet_service;

pub use intent_locks::IntentLocks;
pub use intent_tracker::{IntentTracker, StatusSnapshot, SweepReport, TrackerConfig};
pub use reconciliation::{ApplyOutcome, Reconciliation, ReconciliationEngine};
pub use wallet_service::{CreditOutcome, WalletService};
