//! Background reconciliation worker
//!
//! Every tick: settle held client outcomes, expire intents past their TTL,
//! then poll the gateway for open intents nobody has heard about in a while
//! (missed webhooks). Stopping the worker never cancels a server-side intent.

use crate::error::TrackerError;
use crate::services::{ApplyOutcome, IntentTracker, ReconciliationEngine};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconciliationWorkerConfig {
    /// How often the worker wakes up (seconds)
    pub sweep_interval_secs: u64,
    /// Poll the gateway for intents open longer than this (seconds)
    pub poll_after_secs: u64,
}

impl Default for ReconciliationWorkerConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 60,
            poll_after_secs: 120,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error(transparent)]
    Tracker(#[from] TrackerError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub settled: usize,
    pub expired: usize,
    pub polled: usize,
    pub resolved: usize,
    pub poll_failures: usize,
}

pub struct ReconciliationWorker {
    tracker: Arc<IntentTracker>,
    engine: Arc<ReconciliationEngine>,
    config: ReconciliationWorkerConfig,
}

impl ReconciliationWorker {
    pub fn new(
        tracker: Arc<IntentTracker>,
        engine: Arc<ReconciliationEngine>,
        config: ReconciliationWorkerConfig,
    ) -> Self {
        Self {
            tracker,
            engine,
            config,
        }
    }

    /// Main loop; returns once `shutdown_rx` flips or its sender is dropped.
    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            sweep_interval_secs = self.config.sweep_interval_secs,
            poll_after_secs = self.config.poll_after_secs,
            "Reconciliation worker started"
        );

        let mut ticker = interval(Duration::from_secs(self.config.sweep_interval_secs.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    info!("Shutdown signal received, stopping reconciliation worker");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.process_cycle(Utc::now()).await {
                        error!(error = %e, "Error in reconciliation cycle");
                    }
                }
            }
        }

        info!("Reconciliation worker stopped");
    }

    /// One pass of the sweep and the polling fallback.
    pub async fn process_cycle(&self, now: DateTime<Utc>) -> Result<CycleReport, WorkerError> {
        debug!("Starting reconciliation cycle");

        let sweep = self.tracker.sweep(now).await?;
        let mut report = CycleReport {
            settled: sweep.settled,
            expired: sweep.expired,
            ..CycleReport::default()
        };

        self.poll_open_intents(now, &mut report).await?;

        if report != CycleReport::default() {
            info!(
                settled = report.settled,
                expired = report.expired,
                polled = report.polled,
                resolved = report.resolved,
                poll_failures = report.poll_failures,
                "Reconciliation cycle completed"
            );
        }
        Ok(report)
    }

    #[instrument(skip(self, report), fields(worker = "reconciliation"))]
    async fn poll_open_intents(
        &self,
        now: DateTime<Utc>,
        report: &mut CycleReport,
    ) -> Result<(), WorkerError> {
        let poll_after = chrono::Duration::seconds(self.config.poll_after_secs as i64);
        let open = self.tracker.open_intents_older_than(poll_after, now).await?;

        for intent in open {
            report.polled += 1;
            match self.engine.poll_gateway(&intent.intent_id).await {
                Ok(result) => {
                    if matches!(
                        result.outcome,
                        ApplyOutcome::Credited { .. } | ApplyOutcome::Closed { .. }
                    ) {
                        report.resolved += 1;
                    }
                    debug!(intent_id = %intent.intent_id, outcome = ?result.outcome, "Polled intent");
                }
                Err(e) if e.is_integrity_violation() => {
                    report.poll_failures += 1;
                    error!(intent_id = %intent.intent_id, error = %e, "Integrity violation while polling");
                }
                Err(e) => {
                    report.poll_failures += 1;
                    warn!(intent_id = %intent.intent_id, error = %e, "Polling fallback failed");
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{InMemoryIntentRepository, InMemoryLedger, IntentRepository};
    use crate::domain::{IntentStatus, PaymentIntent};
    use crate::gateway::{MockGateway, WebhookVerifier};
    use crate::services::{IntentLocks, TrackerConfig, WalletService};
    use rust_decimal_macros::dec;

    struct Setup {
        worker: ReconciliationWorker,
        tracker: Arc<IntentTracker>,
        wallet: Arc<WalletService>,
        gateway: Arc<MockGateway>,
        intents: Arc<InMemoryIntentRepository>,
    }

    fn setup() -> Setup {
        let intents = Arc::new(InMemoryIntentRepository::new());
        let gateway = Arc::new(MockGateway::new("mock"));
        let locks = IntentLocks::new();
        let wallet = Arc::new(WalletService::new(Arc::new(InMemoryLedger::new())));
        let tracker = Arc::new(IntentTracker::new(
            intents.clone(),
            gateway.clone(),
            locks.clone(),
            TrackerConfig::default(),
        ));
        let engine = Arc::new(ReconciliationEngine::new(
            intents.clone(),
            wallet.clone(),
            tracker.clone(),
            WebhookVerifier::new("whsec_test"),
            locks,
        ));
        let worker =
            ReconciliationWorker::new(tracker.clone(), engine, ReconciliationWorkerConfig::default());
        Setup {
            worker,
            tracker,
            wallet,
            gateway,
            intents,
        }
    }

    #[tokio::test]
    async fn test_cycle_polls_missed_webhook() {
        let s = setup();
        let intent = s.tracker.create_intent("u1", dec!(250), "k1").await.unwrap();
        s.gateway.set_status(&intent.intent_id, IntentStatus::Succeeded);

        // Too young for the polling fallback.
        let report = s.worker.process_cycle(Utc::now()).await.unwrap();
        assert_eq!(report.polled, 0);

        let later = Utc::now() + chrono::Duration::minutes(3);
        let report = s.worker.process_cycle(later).await.unwrap();
        assert_eq!(report.polled, 1);
        assert_eq!(report.resolved, 1);
        assert_eq!(s.wallet.get_balance("u1").await.unwrap(), dec!(250.00));
    }

    #[tokio::test]
    async fn test_cycle_expires_before_polling() {
        let s = setup();
        let now = Utc::now();
        s.intents
            .insert(PaymentIntent::new(
                "pi_old",
                "u1",
                dec!(100),
                "k1",
                None,
                now - chrono::Duration::minutes(31),
            ))
            .await
            .unwrap();

        let report = s.worker.process_cycle(now).await.unwrap();
        assert_eq!(report.expired, 1);
        assert_eq!(report.polled, 0);
        assert_eq!(
            s.tracker.get_intent("pi_old").await.unwrap().status,
            IntentStatus::Expired
        );
    }

    #[tokio::test]
    async fn test_poll_failure_does_not_stop_cycle() {
        let s = setup();
        let intent = s.tracker.create_intent("u1", dec!(250), "k1").await.unwrap();
        s.gateway.fail_next_get(crate::gateway::GatewayError::Timeout("slow".into()));

        let later = Utc::now() + chrono::Duration::minutes(3);
        let report = s.worker.process_cycle(later).await.unwrap();
        assert_eq!(report.polled, 1);
        assert_eq!(report.resolved, 0);
        assert_eq!(
            s.tracker.get_intent(&intent.intent_id).await.unwrap().status,
            IntentStatus::Created
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown() {
        let s = setup();
        let (tx, rx) = watch::channel(false);
        let worker = Arc::new(s.worker);

        let handle = tokio::spawn({
            let worker = worker.clone();
            async move { worker.run(rx).await }
        });
        tokio::time::sleep(Duration::from_secs(150)).await;
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("worker did not stop")
            .unwrap();
    }
}
