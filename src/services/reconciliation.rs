//! Reconciliation Engine
//!
//! The only component that moves an intent to a terminal status or asks the
//! wallet for a deposit. Every input channel (gateway poll, webhook, operator
//! confirmation, client report) is turned into a `ReconciliationEvent` and
//! goes through `apply`.

use crate::database::intent_repository::IntentRepository;
use crate::domain::{IntentStatus, PaymentIntent, ProvisionalOutcome, ReconciliationEvent};
use crate::error::ReconcileError;
use crate::gateway::{WebhookPayload, WebhookVerifier};
use crate::logging::redact_payload;
use crate::monitor::Outcome;
use crate::services::intent_locks::IntentLocks;
use crate::services::intent_tracker::IntentTracker;
use crate::services::state_machine::{decide, Decision, IgnoreReason};
use crate::services::wallet_service::{CreditOutcome, WalletService};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ApplyOutcome {
    /// Intent moved to SUCCEEDED. When the deposit already existed from an
    /// earlier, interrupted attempt, `transaction_id` names that deposit.
    Credited { transaction_id: Option<Uuid> },
    Closed { status: IntentStatus },
    Advanced { status: IntentStatus },
    /// Client-observed negative outcome recorded, intent still open.
    Provisional { status: IntentStatus },
    Ignored { reason: IgnoreReason },
    /// Gateway unreachable; nothing was applied.
    Stale,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reconciliation {
    pub intent: PaymentIntent,
    pub outcome: ApplyOutcome,
}

pub struct ReconciliationEngine {
    intents: Arc<dyn IntentRepository>,
    wallet: Arc<WalletService>,
    tracker: Arc<IntentTracker>,
    verifier: WebhookVerifier,
    locks: IntentLocks,
}

impl ReconciliationEngine {
    pub fn new(
        intents: Arc<dyn IntentRepository>,
        wallet: Arc<WalletService>,
        tracker: Arc<IntentTracker>,
        verifier: WebhookVerifier,
        locks: IntentLocks,
    ) -> Self {
        Self {
            intents,
            wallet,
            tracker,
            verifier,
            locks,
        }
    }

    /// Apply one observation under the intent's lock.
    #[instrument(
        skip(self, event),
        fields(
            intent_id = %event.intent_id,
            source = %event.source,
            observed = %event.observed_status,
            client = event.reported_by_client,
        )
    )]
    pub async fn apply(&self, event: ReconciliationEvent) -> Result<Reconciliation, ReconcileError> {
        let _guard = self.locks.lock(&event.intent_id).await;

        if let Some(payload) = &event.raw_payload {
            debug!(payload = %redact_payload(payload), "Observed payload");
        }
        let intent = self.load(&event.intent_id).await?;
        let decision = decide(&intent, &event);
        debug!(current = %intent.status, decision = ?decision, "Reconciliation decision");

        let outcome = match decision {
            Decision::Ignore(reason) => {
                if event.observed_status == IntentStatus::Succeeded
                    && !event.reported_by_client
                    && intent.status != IntentStatus::Succeeded
                {
                    error!(
                        current = %intent.status,
                        amount = ?event.amount,
                        "Gateway reports success for a closed intent, not credited; operator review required"
                    );
                } else {
                    debug!(reason = ?reason, "Event ignored");
                }
                return Ok(Reconciliation {
                    intent,
                    outcome: ApplyOutcome::Ignored { reason },
                });
            }
            Decision::AmountMismatch { expected, observed } => {
                error!(
                    expected = %expected,
                    observed = %observed,
                    "Success reported with mismatched amount, refusing to credit"
                );
                return Err(ReconcileError::AmountMismatch {
                    intent_id: intent.intent_id,
                    expected,
                    observed,
                });
            }
            Decision::Credit { amount } => self.settle_success(&intent, amount, &event).await?,
            Decision::Close(status) => {
                self.transition(&intent, status, &event).await?;
                info!(status = %status, "Payment intent closed");
                ApplyOutcome::Closed { status }
            }
            Decision::Advance(status) => {
                self.transition(&intent, status, &event).await?;
                ApplyOutcome::Advanced { status }
            }
            Decision::HoldProvisional(status) => {
                let held = ProvisionalOutcome {
                    status,
                    observed_at: event.observed_at,
                };
                if !self
                    .intents
                    .set_provisional(&intent.intent_id, intent.status, held)
                    .await?
                {
                    return Err(ReconcileError::ConcurrentModification(intent.intent_id));
                }
                info!(status = %status, "Client-observed outcome held pending gateway confirmation");
                ApplyOutcome::Provisional { status }
            }
        };

        Ok(Reconciliation {
            intent: self.load(&event.intent_id).await?,
            outcome,
        })
    }

    /// Deposit first, then record SUCCEEDED. A retry after a crash between
    /// the two finds the deposit (`AlreadyCredited`) and only finishes the
    /// status write.
    async fn settle_success(
        &self,
        intent: &PaymentIntent,
        amount: Decimal,
        event: &ReconciliationEvent,
    ) -> Result<ApplyOutcome, ReconcileError> {
        if intent.status.is_negative() {
            warn!(
                previous = %intent.status,
                "Authoritative success supersedes earlier negative outcome"
            );
        }
        let credited = self
            .wallet
            .credit(&intent.user_id, amount, &intent.intent_id)
            .await?;
        self.transition(intent, IntentStatus::Succeeded, event).await?;

        let transaction_id = match credited {
            CreditOutcome::Credited(tx) => Some(tx.transaction_id),
            CreditOutcome::AlreadyCredited => {
                warn!("Deposit existed before SUCCEEDED was recorded, status repaired");
                self.wallet
                    .deposit_for_intent(&intent.intent_id)
                    .await?
                    .map(|tx| tx.transaction_id)
            }
        };
        info!(amount = %amount, "Payment intent succeeded and wallet credited");
        Ok(ApplyOutcome::Credited { transaction_id })
    }

    async fn transition(
        &self,
        intent: &PaymentIntent,
        next: IntentStatus,
        event: &ReconciliationEvent,
    ) -> Result<(), ReconcileError> {
        let moved = self
            .intents
            .transition_status(
                &intent.intent_id,
                intent.status,
                next,
                event.raw_payload.clone(),
                Utc::now(),
            )
            .await?;
        if moved {
            Ok(())
        } else {
            Err(ReconcileError::ConcurrentModification(intent.intent_id.clone()))
        }
    }

    async fn load(&self, intent_id: &str) -> Result<PaymentIntent, ReconcileError> {
        self.intents
            .get(intent_id)
            .await?
            .ok_or_else(|| ReconcileError::IntentNotFound(intent_id.to_string()))
    }

    /// CLIENT_POLL adapter: ask the gateway and reconcile what it says. A stale
    /// snapshot changes nothing.
    pub async fn poll_gateway(&self, intent_id: &str) -> Result<Reconciliation, ReconcileError> {
        let snapshot = self.tracker.fetch_status(intent_id).await?;

        if snapshot.stale {
            return Ok(Reconciliation {
                intent: snapshot.intent,
                outcome: ApplyOutcome::Stale,
            });
        }
        let Some(status) = snapshot.gateway_status else {
            return Ok(Reconciliation {
                outcome: ApplyOutcome::Ignored {
                    reason: IgnoreReason::AlreadyTerminal(snapshot.intent.status),
                },
                intent: snapshot.intent,
            });
        };

        let mut event = ReconciliationEvent::gateway_poll(intent_id, status);
        if let Some(amount) = snapshot.gateway_amount {
            event = event.with_amount(amount);
        }
        if let Some(payload) = snapshot.gateway_payload {
            event = event.with_raw_payload(payload);
        }
        self.apply(event).await
    }

    /// WEBHOOK adapter. The signature is checked before anything is read.
    pub async fn ingest_webhook(
        &self,
        payload: WebhookPayload,
    ) -> Result<Reconciliation, ReconcileError> {
        debug!(payload = %redact_payload(&payload), "Webhook received");
        let event = self.verifier.verified_event(payload).inspect_err(|e| {
            warn!(error = %e, "Rejected webhook");
        })?;
        self.apply(event).await
    }

    /// MANUAL_ADMIN adapter. Same rule as every other source.
    pub async fn confirm_manually(
        &self,
        intent_id: &str,
        amount: Decimal,
        operator: &str,
    ) -> Result<Reconciliation, ReconcileError> {
        info!(intent_id = %intent_id, operator = %operator, "Manual confirmation requested");
        let event = ReconciliationEvent::manual_confirm(intent_id, amount)
            .with_raw_payload(serde_json::json!({ "confirmedBy": operator, "amount": amount }));
        self.apply(event).await
    }

    /// Client monitor report. A success redirect is verified with the gateway;
    /// negative outcomes are applied as client observations.
    pub async fn report_client_outcome(
        &self,
        intent_id: &str,
        outcome: &Outcome,
    ) -> Result<Reconciliation, ReconcileError> {
        match outcome.to_event(intent_id) {
            Some(event) => self.apply(event).await,
            None => self.poll_gateway(intent_id).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::intent_repository::InMemoryIntentRepository;
    use crate::database::ledger_repository::InMemoryLedger;
    use crate::gateway::{GatewayError, MockGateway};
    use crate::monitor::ErrorReason;
    use crate::services::intent_tracker::TrackerConfig;
    use rust_decimal_macros::dec;

    struct Harness {
        engine: Arc<ReconciliationEngine>,
        tracker: Arc<IntentTracker>,
        wallet: Arc<WalletService>,
        gateway: Arc<MockGateway>,
        verifier: WebhookVerifier,
    }

    fn harness() -> Harness {
        let intents: Arc<InMemoryIntentRepository> = Arc::new(InMemoryIntentRepository::new());
        let gateway = Arc::new(MockGateway::new("mock"));
        let locks = IntentLocks::new();
        let wallet = Arc::new(WalletService::new(Arc::new(InMemoryLedger::new())));
        let tracker = Arc::new(IntentTracker::new(
            intents.clone(),
            gateway.clone(),
            locks.clone(),
            TrackerConfig::default(),
        ));
        let verifier = WebhookVerifier::new("whsec_test");
        let engine = Arc::new(ReconciliationEngine::new(
            intents,
            wallet.clone(),
            tracker.clone(),
            verifier.clone(),
            locks,
        ));
        Harness {
            engine,
            tracker,
            wallet,
            gateway,
            verifier,
        }
    }

    fn webhook(h: &Harness, intent_id: &str, status: &str, amount: Decimal) -> WebhookPayload {
        WebhookPayload {
            intent_id: intent_id.to_string(),
            status: status.to_string(),
            amount,
            signature: Some(h.verifier.sign(intent_id, status, amount).unwrap()),
        }
    }

    #[tokio::test]
    async fn test_webhook_success_credits_once() {
        let h = harness();
        let intent = h.tracker.create_intent("u1", dec!(500), "k1").await.unwrap();

        let first = h
            .engine
            .ingest_webhook(webhook(&h, &intent.intent_id, "SUCCEEDED", dec!(500)))
            .await
            .unwrap();
        assert!(matches!(first.outcome, ApplyOutcome::Credited { transaction_id: Some(_) }));
        assert_eq!(first.intent.status, IntentStatus::Succeeded);

        let second = h
            .engine
            .ingest_webhook(webhook(&h, &intent.intent_id, "SUCCEEDED", dec!(500)))
            .await
            .unwrap();
        assert_eq!(
            second.outcome,
            ApplyOutcome::Ignored { reason: IgnoreReason::AlreadyTerminal(IntentStatus::Succeeded) }
        );
        assert_eq!(h.wallet.get_balance("u1").await.unwrap(), dec!(500.00));
    }

    #[tokio::test]
    async fn test_interrupted_success_is_repaired_with_existing_deposit() {
        let h = harness();
        let intent = h.tracker.create_intent("u1", dec!(500), "k1").await.unwrap();
        // Deposit written, status update lost.
        let CreditOutcome::Credited(deposit) =
            h.wallet.credit("u1", dec!(500), &intent.intent_id).await.unwrap()
        else {
            panic!("expected a fresh deposit");
        };

        let repaired = h
            .engine
            .ingest_webhook(webhook(&h, &intent.intent_id, "SUCCEEDED", dec!(500)))
            .await
            .unwrap();
        assert_eq!(
            repaired.outcome,
            ApplyOutcome::Credited { transaction_id: Some(deposit.transaction_id) }
        );
        assert_eq!(repaired.intent.status, IntentStatus::Succeeded);
        assert_eq!(h.wallet.get_balance("u1").await.unwrap(), dec!(500.00));
    }

    #[tokio::test]
    async fn test_bad_signature_never_reaches_ledger() {
        let h = harness();
        let intent = h.tracker.create_intent("u1", dec!(500), "k1").await.unwrap();
        let mut payload = webhook(&h, &intent.intent_id, "SUCCEEDED", dec!(500));
        payload.signature = Some("00".repeat(32));

        let err = h.engine.ingest_webhook(payload).await.unwrap_err();
        assert!(err.is_integrity_violation());
        assert!(h.wallet.get_balance("u1").await.is_err());
    }

    #[tokio::test]
    async fn test_amount_mismatch_is_refused() {
        let h = harness();
        let intent = h.tracker.create_intent("u1", dec!(500), "k1").await.unwrap();

        let err = h
            .engine
            .confirm_manually(&intent.intent_id, dec!(5000), "ops@example.com")
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::AmountMismatch { .. }));
        assert_eq!(
            h.tracker.get_intent(&intent.intent_id).await.unwrap().status,
            IntentStatus::Created
        );
    }

    #[derive(Clone, Default)]
    struct LogBuffer(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl LogBuffer {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    #[tokio::test]
    async fn test_payload_secrets_never_reach_the_log() {
        let buffer = LogBuffer::default();
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let _default = tracing::subscriber::set_default(subscriber);

        let h = harness();
        let intent = h.tracker.create_intent("u1", dec!(500), "k1").await.unwrap();
        let payload = webhook(&h, &intent.intent_id, "PROCESSING", dec!(500));
        let signature = payload.signature.clone().unwrap();
        h.engine.ingest_webhook(payload).await.unwrap();

        let snapshot = ReconciliationEvent::gateway_poll(&intent.intent_id, IntentStatus::Processing)
            .with_raw_payload(serde_json::json!({
                "intentId": intent.intent_id,
                "status": "PROCESSING",
                "token": "tok_live_4242",
            }));
        h.engine.apply(snapshot).await.unwrap();

        let logs = buffer.contents();
        assert!(logs.contains("Webhook received"));
        assert!(logs.contains("[REDACTED]"));
        assert!(!logs.contains(&signature));
        assert!(!logs.contains("tok_live_4242"));
    }

    #[tokio::test]
    async fn test_unknown_intent() {
        let h = harness();
        let err = h
            .engine
            .apply(ReconciliationEvent::gateway_poll("pi_missing", IntentStatus::Succeeded))
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::IntentNotFound(_)));
    }

    #[tokio::test]
    async fn test_poll_applies_gateway_status_and_skips_stale() {
        let h = harness();
        let intent = h.tracker.create_intent("u1", dec!(500), "k1").await.unwrap();

        h.gateway.set_status(&intent.intent_id, IntentStatus::Processing);
        let polled = h.engine.poll_gateway(&intent.intent_id).await.unwrap();
        assert_eq!(polled.outcome, ApplyOutcome::Advanced { status: IntentStatus::Processing });

        h.gateway.set_status(&intent.intent_id, IntentStatus::Succeeded);
        h.gateway.fail_next_get(GatewayError::Timeout("slow".into()));
        let stale = h.engine.poll_gateway(&intent.intent_id).await.unwrap();
        assert_eq!(stale.outcome, ApplyOutcome::Stale);
        assert_eq!(stale.intent.status, IntentStatus::Processing);

        let settled = h.engine.poll_gateway(&intent.intent_id).await.unwrap();
        assert!(matches!(settled.outcome, ApplyOutcome::Credited { .. }));
        assert_eq!(h.wallet.get_balance("u1").await.unwrap(), dec!(500.00));
    }

    #[tokio::test]
    async fn test_client_cancel_is_held_then_superseded_by_success() {
        let h = harness();
        let intent = h.tracker.create_intent("u1", dec!(500), "k1").await.unwrap();

        let held = h
            .engine
            .report_client_outcome(&intent.intent_id, &Outcome::Cancelled)
            .await
            .unwrap();
        assert_eq!(held.outcome, ApplyOutcome::Provisional { status: IntentStatus::Cancelled });
        assert!(!held.intent.is_terminal());

        let again = h
            .engine
            .report_client_outcome(&intent.intent_id, &Outcome::Error(ErrorReason::Timeout))
            .await
            .unwrap();
        assert_eq!(
            again.outcome,
            ApplyOutcome::Ignored { reason: IgnoreReason::ProvisionalPending }
        );

        let success = h
            .engine
            .ingest_webhook(webhook(&h, &intent.intent_id, "SUCCEEDED", dec!(500)))
            .await
            .unwrap();
        assert_eq!(success.intent.status, IntentStatus::Succeeded);
        assert!(success.intent.provisional.is_none());
    }

    #[tokio::test]
    async fn test_client_success_redirect_polls_gateway() {
        let h = harness();
        let intent = h.tracker.create_intent("u1", dec!(500), "k1").await.unwrap();

        // Redirected to the success page, gateway still processing: no credit.
        h.gateway.set_status(&intent.intent_id, IntentStatus::Processing);
        let result = h
            .engine
            .report_client_outcome(&intent.intent_id, &Outcome::Success)
            .await
            .unwrap();
        assert_eq!(result.intent.status, IntentStatus::Processing);
        assert!(h.wallet.get_balance("u1").await.is_err());
        assert_eq!(h.gateway.get_calls(), 1);
    }
}
