//! Application configuration
//!
//! Defaults are layered under `WALLET__*` environment variables, e.g.
//! `WALLET__SERVER__PORT=8080` or `WALLET__GATEWAY__BACKOFF_SECS=1,2,4`.
//! A `.env` file is loaded first when present.

use crate::gateway::RetryPolicy;
use crate::monitor::MonitorConfig;
use crate::services::TrackerConfig;
use crate::workers::ReconciliationWorkerConfig;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;

const ENV_PREFIX: &str = "WALLET";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub gateway: GatewayConfig,
    pub webhook: WebhookConfig,
    pub admin: AdminConfig,
    pub reconciliation: ReconciliationConfig,
    pub monitor: MonitorConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Postgres URL; in-memory stores are used when unset.
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Primary gateway base URL; the scriptable mock is used when unset.
    pub primary_url: Option<String>,
    pub secondary_url: Option<String>,
    pub timeout_secs: u64,
    /// Attempts per endpoint, including the first.
    pub attempts: u32,
    pub backoff_secs: Vec<u64>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            primary_url: None,
            secondary_url: None,
            timeout_secs: 15,
            attempts: 3,
            backoff_secs: vec![1, 2, 4],
        }
    }
}

impl GatewayConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.attempts,
            backoff: self
                .backoff_secs
                .iter()
                .map(|s| Duration::from_secs(*s))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub secret: String,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            secret: "dev-webhook-secret".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    pub token: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            token: "dev-admin-token".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconciliationConfig {
    pub minimum_amount: Decimal,
    pub intent_ttl_secs: u64,
    pub settle_window_secs: u64,
    pub sweep_batch: usize,
    pub sweep_interval_secs: u64,
    pub poll_after_secs: u64,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        let tracker = TrackerConfig::default();
        let worker = ReconciliationWorkerConfig::default();
        Self {
            minimum_amount: tracker.minimum_amount,
            intent_ttl_secs: tracker.intent_ttl.num_seconds() as u64,
            settle_window_secs: tracker.settle_window.num_seconds() as u64,
            sweep_batch: tracker.sweep_batch,
            sweep_interval_secs: worker.sweep_interval_secs,
            poll_after_secs: worker.poll_after_secs,
        }
    }
}

impl ReconciliationConfig {
    pub fn tracker(&self) -> TrackerConfig {
        TrackerConfig {
            minimum_amount: self.minimum_amount,
            intent_ttl: chrono::Duration::seconds(self.intent_ttl_secs as i64),
            settle_window: chrono::Duration::seconds(self.settle_window_secs as i64),
            sweep_batch: self.sweep_batch,
        }
    }

    pub fn worker(&self) -> ReconciliationWorkerConfig {
        ReconciliationWorkerConfig {
            sweep_interval_secs: self.sweep_interval_secs,
            poll_after_secs: self.poll_after_secs,
        }
    }
}

impl AppConfig {
    /// Load `.env`, then defaults overlaid with `WALLET__*` variables.
    pub fn load() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_environment(Self::environment_source())
    }

    fn environment_source() -> config::Environment {
        config::Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("gateway.backoff_secs")
            .with_list_parse_key("monitor.success_paths")
            .with_list_parse_key("monitor.cancel_paths")
            .with_list_parse_key("monitor.error_paths")
            .with_list_parse_key("monitor.failure_markers")
    }

    fn from_environment(source: config::Environment) -> Result<Self, ConfigError> {
        let cfg: AppConfig = config::Config::builder()
            .add_source(source)
            .build()?
            .try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.gateway.attempts == 0 {
            return Err(ConfigError::Invalid(
                "gateway.attempts must be at least 1".to_string(),
            ));
        }
        if self.gateway.backoff_secs.is_empty() {
            return Err(ConfigError::Invalid(
                "gateway.backoff_secs must not be empty".to_string(),
            ));
        }
        if self.webhook.secret.is_empty() {
            return Err(ConfigError::Invalid("webhook.secret is required".to_string()));
        }
        if self.admin.token.is_empty() {
            return Err(ConfigError::Invalid("admin.token is required".to_string()));
        }
        if self.reconciliation.minimum_amount <= Decimal::ZERO {
            return Err(ConfigError::Invalid(
                "reconciliation.minimum_amount must be positive".to_string(),
            ));
        }
        if self.monitor.history_size == 0 || self.monitor.max_navigations == 0 {
            return Err(ConfigError::Invalid(
                "monitor.history_size and monitor.max_navigations must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
