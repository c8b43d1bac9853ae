use crate::domain::{IntentStatus, ReconciliationEvent};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Return address the gateway redirects to, e.g. `app://payment`.
    pub return_url: String,
    /// Last path segment of the return address meaning success.
    pub success_paths: Vec<String>,
    /// Last path segment of the return address meaning the payer backed out.
    pub cancel_paths: Vec<String>,
    /// Last path segment of the return address meaning the payment errored.
    pub error_paths: Vec<String>,
    /// Substrings that mark a gateway-hosted failure page.
    pub failure_markers: Vec<String>,
    pub history_size: usize,
    /// Times one URL may be revisited inside the history before it is a loop.
    pub revisit_budget: usize,
    /// Hard ceiling on navigations for one checkout.
    pub max_navigations: usize,
    #[serde(with = "duration_secs")]
    pub load_timeout: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            return_url: "app://payment".to_string(),
            success_paths: vec!["success".to_string()],
            cancel_paths: vec!["cancel".to_string(), "cancelled".to_string()],
            error_paths: vec!["error".to_string(), "failure".to_string()],
            failure_markers: vec!["payment_failed".to_string(), "checkout/error".to_string()],
            history_size: 10,
            revisit_budget: 2,
            max_navigations: 50,
            load_timeout: Duration::from_secs(30),
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorReason {
    RedirectLoop,
    Timeout,
    /// Return address or failure page reported an error.
    Gateway,
}

impl ErrorReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorReason::RedirectLoop => "redirect_loop",
            ErrorReason::Timeout => "timeout",
            ErrorReason::Gateway => "gateway_error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Cancelled,
    Error(ErrorReason),
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success => f.write_str("success"),
            Outcome::Cancelled => f.write_str("cancelled"),
            Outcome::Error(reason) => write!(f, "error({})", reason.as_str()),
        }
    }
}

impl Outcome {
    /// Reconciliation input for a client-observed outcome. A success
    /// redirect carries no authority, so it yields no event: the caller asks
    /// the gateway instead.
    pub fn to_event(&self, intent_id: &str) -> Option<ReconciliationEvent> {
        let (status, reason) = match self {
            Outcome::Success => return None,
            Outcome::Cancelled => (IntentStatus::Cancelled, "cancelled"),
            Outcome::Error(reason) => (IntentStatus::Failed, reason.as_str()),
        };
        Some(
            ReconciliationEvent::client_report(intent_id, status).with_raw_payload(
                serde_json::json!({ "monitor": { "outcome": self.to_string(), "reason": reason } }),
            ),
        )
    }
}

/// Client-side observer of one checkout session.
///
/// Fed navigation starts and load completions; reports the first outcome it
/// classifies and nothing after that. It never touches wallet state.
#[derive(Debug)]
pub struct RedirectMonitor {
    intent_id: String,
    config: MonitorConfig,
    return_base: Option<Url>,
    history: VecDeque<String>,
    navigations: usize,
    pending_load: Option<(String, Instant)>,
    outcome: Option<Outcome>,
}

impl RedirectMonitor {
    pub fn new(intent_id: impl Into<String>, config: MonitorConfig) -> Self {
        let return_base = Url::parse(&config.return_url).ok();
        Self {
            intent_id: intent_id.into(),
            config,
            return_base,
            history: VecDeque::new(),
            navigations: 0,
            pending_load: None,
            outcome: None,
        }
    }

    pub fn intent_id(&self) -> &str {
        &self.intent_id
    }

    pub fn outcome(&self) -> Option<&Outcome> {
        self.outcome.as_ref()
    }

    /// Instant at which the in-flight navigation times out, if any.
    pub fn deadline(&self) -> Option<Instant> {
        if self.outcome.is_some() {
            return None;
        }
        self.pending_load
            .as_ref()
            .map(|(_, started)| *started + self.config.load_timeout)
    }

    /// A navigation to `url` started at `now`.
    pub fn on_navigation(&mut self, url: &str, now: Instant) -> Option<Outcome> {
        if self.outcome.is_some() {
            return None;
        }

        if let Some(outcome) = self.classify(url) {
            return self.finish(outcome);
        }

        self.navigations += 1;
        let revisits = self.history.iter().filter(|seen| seen.as_str() == url).count();
        if revisits > self.config.revisit_budget || self.navigations > self.config.max_navigations {
            tracing::warn!(
                intent_id = %self.intent_id,
                revisits = revisits,
                navigations = self.navigations,
                "Redirect loop detected"
            );
            return self.finish(Outcome::Error(ErrorReason::RedirectLoop));
        }

        if self.history.len() == self.config.history_size.max(1) {
            self.history.pop_front();
        }
        self.history.push_back(url.to_string());
        self.pending_load = Some((url.to_string(), now));
        None
    }

    /// The page at `url` finished loading.
    pub fn on_load_finished(&mut self, url: &str) {
        if self
            .pending_load
            .as_ref()
            .is_some_and(|(pending, _)| pending == url)
        {
            self.pending_load = None;
        }
    }

    /// Report `timeout` if the in-flight navigation has not loaded by `now`.
    pub fn check_timeout(&mut self, now: Instant) -> Option<Outcome> {
        match self.deadline() {
            Some(deadline) if now >= deadline => self.finish(Outcome::Error(ErrorReason::Timeout)),
            _ => None,
        }
    }

    fn finish(&mut self, outcome: Outcome) -> Option<Outcome> {
        tracing::info!(intent_id = %self.intent_id, outcome = %outcome, "Checkout outcome observed");
        self.pending_load = None;
        self.outcome = Some(outcome.clone());
        Some(outcome)
    }

    fn classify(&self, raw: &str) -> Option<Outcome> {
        let url = Url::parse(raw).ok()?;

        if let Some(base) = &self.return_base {
            let same_target = url.scheme() == base.scheme() && url.host_str() == base.host_str();
            if same_target && url.path().starts_with(base.path().trim_end_matches('/')) {
                return self.classify_return(&url);
            }
        }

        if self
            .config
            .failure_markers
            .iter()
            .any(|marker| raw.contains(marker.as_str()))
        {
            return Some(Outcome::Error(ErrorReason::Gateway));
        }
        None
    }

    fn classify_return(&self, url: &Url) -> Option<Outcome> {
        // A redirect for some other intent is stale and ignored.
        let other_intent = url
            .query_pairs()
            .find(|(key, _)| key == "intentId")
            .is_some_and(|(_, value)| value != self.intent_id.as_str());
        if other_intent {
            return None;
        }

        let last = url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .unwrap_or_default();
        let matches = |paths: &[String]| paths.iter().any(|p| p.eq_ignore_ascii_case(last));

        if matches(&self.config.success_paths) {
            Some(Outcome::Success)
        } else if matches(&self.config.cancel_paths) {
            Some(Outcome::Cancelled)
        } else if matches(&self.config.error_paths) {
            Some(Outcome::Error(ErrorReason::Gateway))
        } else {
            None
        }
    }
}
