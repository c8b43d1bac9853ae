//! Logging and tracing configuration for the wallet service
//!
//! Structured JSON output in production and human-readable output in
//! development. Includes redaction helpers for payloads that carry webhook
//! signatures or admin credentials.

use std::env;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl Environment {
    /// Detect environment from `ENVIRONMENT` (or `ENV`)
    pub fn from_env() -> Self {
        Self::parse(
            &env::var("ENVIRONMENT")
                .or_else(|_| env::var("ENV"))
                .unwrap_or_else(|_| "development".to_string()),
        )
    }

    pub fn parse(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "staging" | "stage" => Self::Staging,
            _ => Self::Development,
        }
    }

    pub fn default_log_level(&self) -> Level {
        match self {
            Self::Development => Level::DEBUG,
            Self::Staging | Self::Production => Level::INFO,
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

/// Initialize the global tracing subscriber.
///
/// # Environment Variables
/// - `ENVIRONMENT` or `ENV`: "production", "staging" or "development"
/// - `RUST_LOG`: override the filter (e.g. "credit_wallet=debug")
/// - `LOG_FORMAT`: force "json" or "pretty"
pub fn init_tracing() {
    let environment = Environment::from_env();

    let use_json = env::var("LOG_FORMAT")
        .map(|f| f.to_lowercase() == "json")
        .unwrap_or_else(|_| environment.is_production());

    let default_filter = format!(
        "{}={},tower_http=debug,axum=info,sqlx=warn,hyper=warn,reqwest=warn",
        env!("CARGO_PKG_NAME").replace('-', "_"),
        environment.default_log_level()
    );
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if use_json {
        let json_layer = fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
            .with_level(true)
            .with_file(false)
            .with_line_number(false)
            .with_filter(env_filter);

        tracing_subscriber::registry().with(json_layer).init();
    } else {
        let pretty_layer = fmt::layer()
            .pretty()
            .with_target(true)
            .with_level(true)
            .with_file(true)
            .with_line_number(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_filter(env_filter);

        tracing_subscriber::registry().with(pretty_layer).init();
    }

    tracing::info!(
        environment = ?environment,
        format = if use_json { "json" } else { "pretty" },
        "Tracing initialized"
    );
}

/// Mask an opaque identifier (user id, idempotency key) for logging.
///
/// Shows the first and last 4 characters.
///
/// ```
/// use credit_wallet::logging::mask_identifier;
/// assert_eq!(mask_identifier("user-0123456789"), "user...6789");
/// assert_eq!(mask_identifier("short"), "****");
/// ```
pub fn mask_identifier(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 8 {
        return "****".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}

/// Redact sensitive fields from JSON-like text before it is logged.
pub fn redact_sensitive_data(text: &str) -> String {
    let sensitive_keys = [
        "secret",
        "signature",
        "password",
        "token",
        "api_key",
        "apiKey",
        "authorization",
        "admin_token",
        "card_number",
        "cardNumber",
        "cvv",
    ];

    let mut result = text.to_string();
    for key in &sensitive_keys {
        let pattern = format!(r#""{}":\s*"[^"]*""#, key);
        if let Ok(re) = regex::Regex::new(&pattern) {
            result = re
                .replace_all(&result, format!(r#""{}": "[REDACTED]""#, key))
                .to_string();
        }
    }
    result
}

/// Serialize a gateway or webhook payload for logging with secrets redacted.
pub fn redact_payload<T: serde::Serialize>(payload: &T) -> String {
    match serde_json::to_string(payload) {
        Ok(text) => redact_sensitive_data(&text),
        Err(_) => "<unserializable>".to_string(),
    }
}

/// Log a ledger event with a consistent `event_type = "transaction"` shape.
///
/// ```no_run
/// # use credit_wallet::log_transaction;
/// log_transaction!(
///     event = "wallet_deposit",
///     user_id = "user...6789",
///     amount = "500.00",
///     intent_id = "pi_123",
/// );
/// ```
#[macro_export]
macro_rules! log_transaction {
    ($($key:tt = $value:expr),* $(,)?) => {
        tracing::info!(
            event_type = "transaction",
            $($key = tracing::field::display(&$value)),*
        );
    };
}
