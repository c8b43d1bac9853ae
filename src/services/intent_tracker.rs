//! Payment Intent Tracker
//!
//! Creates intents with the gateway, keeps the local shadow rows, answers
//! status lookups and runs the expiry sweep.

use crate::database::intent_repository::{InsertOutcome, IntentRepository};
use crate::domain::{normalize_amount, IntentStatus, PaymentIntent};
use crate::error::TrackerError;
use crate::gateway::{CreateIntentRequest, GatewayError, PaymentGateway};
use crate::logging::mask_identifier;
use crate::services::intent_locks::IntentLocks;
use crate::services::state_machine::{is_expired, settle_provisional};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Smallest top-up accepted.
    pub minimum_amount: Decimal,
    /// Non-terminal intents older than this are expired by the sweep.
    pub intent_ttl: Duration,
    /// How long a client-observed negative outcome waits for the gateway.
    pub settle_window: Duration,
    /// Rows handled per sweep stage.
    pub sweep_batch: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            minimum_amount: Decimal::new(5000, 2),
            intent_ttl: Duration::minutes(30),
            settle_window: Duration::seconds(120),
            sweep_batch: 100,
        }
    }
}

/// Local intent plus what the gateway reported, if it answered.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub intent: PaymentIntent,
    /// True when the gateway could not be reached and `intent` is the last
    /// known local state.
    pub stale: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_status: Option<IntentStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_amount: Option<Decimal>,
    #[serde(skip)]
    pub gateway_payload: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub settled: usize,
    pub expired: usize,
}

pub struct IntentTracker {
    intents: Arc<dyn IntentRepository>,
    gateway: Arc<dyn PaymentGateway>,
    locks: IntentLocks,
    config: TrackerConfig,
}

impl IntentTracker {
    pub fn new(
        intents: Arc<dyn IntentRepository>,
        gateway: Arc<dyn PaymentGateway>,
        locks: IntentLocks,
        config: TrackerConfig,
    ) -> Self {
        Self {
            intents,
            gateway,
            locks,
            config,
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Create a top-up intent. A repeated `(user_id, idempotency_key)` returns
    /// the intent created the first time without calling the gateway again;
    /// concurrent repeats wait for the first one.
    #[instrument(skip(self, user_id, idempotency_key), fields(tracker = "intent", user = %mask_identifier(user_id)))]
    pub async fn create_intent(
        &self,
        user_id: &str,
        amount: Decimal,
        idempotency_key: &str,
    ) -> Result<PaymentIntent, TrackerError> {
        let amount = normalize_amount(amount)?;
        if amount < self.config.minimum_amount {
            return Err(TrackerError::BelowMinimum {
                minimum: self.config.minimum_amount,
                requested: amount,
            });
        }

        let _guard = self
            .locks
            .lock(&format!("create:{}:{}", user_id, idempotency_key))
            .await;
        if let Some(existing) = self
            .intents
            .find_by_idempotency_key(user_id, idempotency_key)
            .await?
        {
            info!(intent_id = %existing.intent_id, "Idempotency token reused, returning existing intent");
            return Ok(existing);
        }

        let request = CreateIntentRequest {
            user_id: user_id.to_string(),
            amount,
            idempotency_key: idempotency_key.to_string(),
        };
        let created = self.gateway.create_intent(&request).await.map_err(|e| {
            warn!(error = %e, "Gateway refused to create intent");
            if e.is_transient() {
                TrackerError::GatewayUnavailable(e.to_string())
            } else {
                TrackerError::GatewayRejected(e.to_string())
            }
        })?;

        let mut intent = PaymentIntent::new(
            created.intent_id,
            user_id,
            amount,
            idempotency_key,
            created.checkout_url,
            Utc::now(),
        );
        intent.raw_gateway_payload = created.raw_payload;

        match self.intents.insert(intent).await? {
            InsertOutcome::Inserted(intent) => {
                info!(intent_id = %intent.intent_id, amount = %intent.requested_amount, "Payment intent created");
                Ok(intent)
            }
            InsertOutcome::Existing(intent) => {
                info!(intent_id = %intent.intent_id, "Concurrent create resolved to existing intent");
                Ok(intent)
            }
        }
    }

    pub async fn get_intent(&self, intent_id: &str) -> Result<PaymentIntent, TrackerError> {
        self.intents
            .get(intent_id)
            .await?
            .ok_or_else(|| TrackerError::IntentNotFound(intent_id.to_string()))
    }

    /// Ask the gateway for the current status. Gateway failures degrade to
    /// the local record flagged `stale` rather than an error.
    #[instrument(skip(self), fields(tracker = "intent"))]
    pub async fn fetch_status(&self, intent_id: &str) -> Result<StatusSnapshot, TrackerError> {
        let intent = self.get_intent(intent_id).await?;
        let local = |intent: PaymentIntent, stale: bool| StatusSnapshot {
            intent,
            stale,
            gateway_status: None,
            gateway_amount: None,
            gateway_payload: None,
        };

        if intent.is_terminal() {
            return Ok(local(intent, false));
        }

        match self.gateway.get_intent(intent_id).await {
            Ok(remote) => {
                let payload = remote.raw_payload.unwrap_or_else(|| {
                    serde_json::json!({
                        "intentId": remote.intent_id,
                        "status": remote.status,
                        "amount": remote.amount,
                    })
                });
                self.intents.record_snapshot(intent_id, payload.clone()).await?;
                Ok(StatusSnapshot {
                    intent,
                    stale: false,
                    gateway_status: Some(remote.status),
                    gateway_amount: remote.amount,
                    gateway_payload: Some(payload),
                })
            }
            Err(GatewayError::NotFound(_)) => {
                warn!(intent_id = %intent_id, "Gateway does not know this intent");
                Ok(local(intent, true))
            }
            Err(e) => {
                warn!(intent_id = %intent_id, error = %e, "Gateway status unavailable, serving stale status");
                Ok(local(intent, true))
            }
        }
    }

    /// Non-terminal intents created more than `poll_after` ago, for the
    /// polling fallback.
    pub async fn open_intents_older_than(
        &self,
        poll_after: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<PaymentIntent>, TrackerError> {
        Ok(self
            .intents
            .list_open_created_before(now - poll_after, self.config.sweep_batch)
            .await?)
    }

    /// Finalize held client outcomes whose settle window has passed.
    #[instrument(skip(self), fields(tracker = "intent"))]
    pub async fn settle_provisional(&self, now: DateTime<Utc>) -> Result<usize, TrackerError> {
        let candidates = self
            .intents
            .list_provisional_before(now - self.config.settle_window, self.config.sweep_batch)
            .await?;

        let mut settled = 0;
        for candidate in candidates {
            let _guard = self.locks.lock(&candidate.intent_id).await;
            let Some(current) = self.intents.get(&candidate.intent_id).await? else {
                continue;
            };
            let Some(status) = settle_provisional(&current, now, self.config.settle_window) else {
                continue;
            };

            if self
                .intents
                .transition_status(&current.intent_id, current.status, status, None, now)
                .await?
            {
                info!(
                    intent_id = %current.intent_id,
                    status = %status,
                    "Client-observed outcome settled"
                );
                settled += 1;
            }
        }
        Ok(settled)
    }

    /// Mark intents older than the TTL as EXPIRED if still non-terminal.
    #[instrument(skip(self), fields(tracker = "intent"))]
    pub async fn expire_stale(&self, now: DateTime<Utc>) -> Result<usize, TrackerError> {
        let candidates = self
            .intents
            .list_open_created_before(now - self.config.intent_ttl, self.config.sweep_batch)
            .await?;

        let mut expired = 0;
        for candidate in candidates {
            let _guard = self.locks.lock(&candidate.intent_id).await;
            let Some(current) = self.intents.get(&candidate.intent_id).await? else {
                continue;
            };
            if !is_expired(&current, now, self.config.intent_ttl) {
                continue;
            }

            if self
                .intents
                .transition_status(
                    &current.intent_id,
                    current.status,
                    IntentStatus::Expired,
                    None,
                    now,
                )
                .await?
            {
                info!(
                    intent_id = %current.intent_id,
                    created_at = %current.created_at,
                    "Payment intent expired"
                );
                expired += 1;
            }
        }
        Ok(expired)
    }

    /// Settle first so a held cancellation wins over a plain expiry.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, TrackerError> {
        let settled = self.settle_provisional(now).await?;
        let expired = self.expire_stale(now).await?;
        Ok(SweepReport { settled, expired })
    }
}
