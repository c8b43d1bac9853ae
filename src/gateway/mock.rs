//! In-process gateway for tests and local runs without a real provider

use super::{CreateIntentRequest, GatewayError, GatewayIntent, PaymentGateway};
use crate::domain::IntentStatus;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct MockState {
    intents: HashMap<String, GatewayIntent>,
    by_key: HashMap<String, String>,
    create_failures: VecDeque<GatewayError>,
    get_failures: VecDeque<GatewayError>,
    create_calls: usize,
    get_calls: usize,
    last_idempotency_key: Option<String>,
}

/// Scriptable gateway. Queued failures are returned first, in order; after
/// that every call succeeds against an in-memory intent table that
/// deduplicates on the idempotency key.
pub struct MockGateway {
    name: String,
    checkout_base: String,
    state: Mutex<MockState>,
}

impl MockGateway {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            checkout_base: "https://checkout.mock.local/pay".to_string(),
            state: Mutex::new(MockState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn fail_next_create(&self, error: GatewayError) {
        self.state().create_failures.push_back(error);
    }

    pub fn fail_next_get(&self, error: GatewayError) {
        self.state().get_failures.push_back(error);
    }

    /// Move a gateway-side intent to `status`, as if the payer acted on it.
    pub fn set_status(&self, intent_id: &str, status: IntentStatus) -> bool {
        match self.state().intents.get_mut(intent_id) {
            Some(intent) => {
                intent.status = status;
                true
            }
            None => false,
        }
    }

    pub fn create_calls(&self) -> usize {
        self.state().create_calls
    }

    pub fn get_calls(&self) -> usize {
        self.state().get_calls
    }

    pub fn last_idempotency_key(&self) -> Option<String> {
        self.state().last_idempotency_key.clone()
    }
}

#[async_trait::async_trait]
impl PaymentGateway for MockGateway {
    fn name(&self) -> &str {
        &self.name
    }

    async fn create_intent(
        &self,
        request: &CreateIntentRequest,
    ) -> Result<GatewayIntent, GatewayError> {
        let mut state = self.state();
        state.create_calls += 1;
        state.last_idempotency_key = Some(request.idempotency_key.clone());

        if let Some(error) = state.create_failures.pop_front() {
            return Err(error);
        }

        if let Some(existing) = state
            .by_key
            .get(&request.idempotency_key)
            .and_then(|id| state.intents.get(id))
        {
            return Ok(existing.clone());
        }

        let intent_id = format!("pi_{}", uuid::Uuid::new_v4().simple());
        let intent = GatewayIntent {
            intent_id: intent_id.clone(),
            status: IntentStatus::Created,
            checkout_url: Some(format!("{}/{}", self.checkout_base, intent_id)),
            amount: Some(request.amount),
            raw_payload: Some(serde_json::json!({
                "gateway": self.name,
                "intentId": intent_id,
                "amount": request.amount,
            })),
        };
        state
            .by_key
            .insert(request.idempotency_key.clone(), intent_id.clone());
        state.intents.insert(intent_id, intent.clone());
        Ok(intent)
    }

    async fn get_intent(&self, intent_id: &str) -> Result<GatewayIntent, GatewayError> {
        let mut state = self.state();
        state.get_calls += 1;

        if let Some(error) = state.get_failures.pop_front() {
            return Err(error);
        }

        state
            .intents
            .get(intent_id)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(intent_id.to_string()))
    }
}
