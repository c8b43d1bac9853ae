//! Background workers

pub mod reconciliation_worker;

pub use reconciliation_worker::{CycleReport, ReconciliationWorker, ReconciliationWorkerConfig};
