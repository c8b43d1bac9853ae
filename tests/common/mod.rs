//! Shared wiring for integration tests: in-memory stores, the mock gateway
//! and a webhook signer using the same secret as the engine.

#![allow(dead_code)]

use std::sync::Arc;

use credit_wallet::database::{InMemoryIntentRepository, InMemoryLedger};
use credit_wallet::gateway::{MockGateway, WebhookPayload, WebhookVerifier};
use credit_wallet::services::{
    IntentLocks, IntentTracker, ReconciliationEngine, TrackerConfig, WalletService,
};
use rust_decimal::Decimal;

pub const WEBHOOK_SECRET: &str = "whsec_integration";

pub struct Harness {
    pub intents: Arc<InMemoryIntentRepository>,
    pub gateway: Arc<MockGateway>,
    pub wallet: Arc<WalletService>,
    pub tracker: Arc<IntentTracker>,
    pub engine: Arc<ReconciliationEngine>,
    pub signer: WebhookVerifier,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(TrackerConfig::default())
    }

    pub fn with_config(config: TrackerConfig) -> Self {
        let intents = Arc::new(InMemoryIntentRepository::new());
        let gateway = Arc::new(MockGateway::new("mock"));
        let locks = IntentLocks::new();
        let wallet = Arc::new(WalletService::new(Arc::new(InMemoryLedger::new())));
        let tracker = Arc::new(IntentTracker::new(
            intents.clone(),
            gateway.clone(),
            locks.clone(),
            config,
        ));
        let signer = WebhookVerifier::new(WEBHOOK_SECRET);
        let engine = Arc::new(ReconciliationEngine::new(
            intents.clone(),
            wallet.clone(),
            tracker.clone(),
            signer.clone(),
            locks,
        ));
        Self {
            intents,
            gateway,
            wallet,
            tracker,
            engine,
            signer,
        }
    }

    /// Webhook body as the gateway would send it.
    pub fn signed_webhook(&self, intent_id: &str, status: &str, amount: Decimal) -> WebhookPayload {
        let signature = self.signer.sign(intent_id, status, amount).unwrap();
        WebhookPayload {
            intent_id: intent_id.to_string(),
            status: status.to_string(),
            amount,
            signature: Some(signature),
        }
    }

    pub async fn balance(&self, user_id: &str) -> Decimal {
        self.wallet.wallet(user_id).await.unwrap().balance
    }

    pub async fn deposit_count(&self, user_id: &str) -> usize {
        self.wallet
            .transactions(user_id, 200)
            .await
            .unwrap()
            .iter()
            .filter(|tx| tx.related_intent_id.is_some())
            .count()
    }
}
