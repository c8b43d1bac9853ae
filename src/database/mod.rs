//! Storage for wallets, ledger rows and payment intents
//!
//! Both stores sit behind traits. The in-memory versions back tests and local
//! runs; the Postgres versions are compiled with the `database` feature.

pub mod error;
pub mod intent_repository;
pub mod ledger_repository;
#[cfg(feature = "database")]
pub mod postgres;

pub use intent_repository::{InMemoryIntentRepository, InsertOutcome, IntentRepository};
pub use ledger_repository::{InMemoryLedger, LedgerRepository};
#[cfg(feature = "database")]
pub use postgres::PgStore;
