//! Game-credit wallet: ledger, payment intent tracking and reconciliation

pub mod api;
pub mod config;
pub mod database;
pub mod domain;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod middleware;
pub mod monitor;
pub mod services;
pub mod workers;
