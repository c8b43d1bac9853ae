//! Persistence for payment intent shadow records
//!
//! Status writes are compare-and-set against the status the caller last read,
//! so a writer that lost a race sees `false` instead of clobbering a newer
//! (possibly terminal) status.

use super::error::DatabaseError;
use crate::domain::{IntentStatus, PaymentIntent, ProvisionalOutcome};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Result of inserting a shadow record keyed by the caller's idempotency token.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    Inserted(PaymentIntent),
    /// A record for the same `(user_id, idempotency_key)` or `intent_id`
    /// already existed and is returned unchanged.
    Existing(PaymentIntent),
}

#[async_trait]
pub trait IntentRepository: Send + Sync {
    async fn insert(&self, intent: PaymentIntent) -> Result<InsertOutcome, DatabaseError>;

    async fn get(&self, intent_id: &str) -> Result<Option<PaymentIntent>, DatabaseError>;

    async fn find_by_idempotency_key(
        &self,
        user_id: &str,
        idempotency_key: &str,
    ) -> Result<Option<PaymentIntent>, DatabaseError>;

    /// Move `intent_id` from `expected` to `next`. Clears any provisional
    /// outcome. Returns `false` when the stored status is no longer `expected`.
    async fn transition_status(
        &self,
        intent_id: &str,
        expected: IntentStatus,
        next: IntentStatus,
        raw_payload: Option<serde_json::Value>,
        at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError>;

    /// Record a client-observed negative outcome without closing the intent.
    async fn set_provisional(
        &self,
        intent_id: &str,
        expected: IntentStatus,
        outcome: ProvisionalOutcome,
    ) -> Result<bool, DatabaseError>;

    /// Store the latest raw gateway snapshot for audit.
    async fn record_snapshot(
        &self,
        intent_id: &str,
        payload: serde_json::Value,
    ) -> Result<(), DatabaseError>;

    /// Non-terminal intents created strictly before `cutoff`, oldest first.
    async fn list_open_created_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<PaymentIntent>, DatabaseError>;

    /// Non-terminal intents whose provisional outcome was observed at or before
    /// `cutoff`, oldest first.
    async fn list_provisional_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<PaymentIntent>, DatabaseError>;
}

#[derive(Default)]
struct IntentState {
    intents: HashMap<String, PaymentIntent>,
    /// (user_id, idempotency_key) -> intent_id
    by_token: HashMap<(String, String), String>,
}

#[derive(Default)]
pub struct InMemoryIntentRepository {
    state: RwLock<IntentState>,
}

impl InMemoryIntentRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IntentRepository for InMemoryIntentRepository {
    async fn insert(&self, intent: PaymentIntent) -> Result<InsertOutcome, DatabaseError> {
        let mut state = self.state.write().await;
        let token = (intent.user_id.clone(), intent.idempotency_key.clone());

        if let Some(existing) = state
            .by_token
            .get(&token)
            .and_then(|id| state.intents.get(id))
            .or_else(|| state.intents.get(&intent.intent_id))
        {
            return Ok(InsertOutcome::Existing(existing.clone()));
        }

        state.by_token.insert(token, intent.intent_id.clone());
        state.intents.insert(intent.intent_id.clone(), intent.clone());
        Ok(InsertOutcome::Inserted(intent))
    }

    async fn get(&self, intent_id: &str) -> Result<Option<PaymentIntent>, DatabaseError> {
        Ok(self.state.read().await.intents.get(intent_id).cloned())
    }

    async fn find_by_idempotency_key(
        &self,
        user_id: &str,
        idempotency_key: &str,
    ) -> Result<Option<PaymentIntent>, DatabaseError> {
        let state = self.state.read().await;
        Ok(state
            .by_token
            .get(&(user_id.to_string(), idempotency_key.to_string()))
            .and_then(|id| state.intents.get(id))
            .cloned())
    }

    async fn transition_status(
        &self,
        intent_id: &str,
        expected: IntentStatus,
        next: IntentStatus,
        raw_payload: Option<serde_json::Value>,
        at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let mut state = self.state.write().await;
        let Some(intent) = state.intents.get_mut(intent_id) else {
            return Ok(false);
        };
        if intent.status != expected {
            return Ok(false);
        }

        intent.status = next;
        intent.provisional = None;
        intent.updated_at = at;
        if raw_payload.is_some() {
            intent.raw_gateway_payload = raw_payload;
        }
        Ok(true)
    }

    async fn set_provisional(
        &self,
        intent_id: &str,
        expected: IntentStatus,
        outcome: ProvisionalOutcome,
    ) -> Result<bool, DatabaseError> {
        let mut state = self.state.write().await;
        let Some(intent) = state.intents.get_mut(intent_id) else {
            return Ok(false);
        };
        if intent.status != expected {
            return Ok(false);
        }

        intent.updated_at = outcome.observed_at;
        intent.provisional = Some(outcome);
        Ok(true)
    }

    async fn record_snapshot(
        &self,
        intent_id: &str,
        payload: serde_json::Value,
    ) -> Result<(), DatabaseError> {
        if let Some(intent) = self.state.write().await.intents.get_mut(intent_id) {
            intent.raw_gateway_payload = Some(payload);
        }
        Ok(())
    }

    async fn list_open_created_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<PaymentIntent>, DatabaseError> {
        let state = self.state.read().await;
        let mut open: Vec<PaymentIntent> = state
            .intents
            .values()
            .filter(|i| !i.is_terminal() && i.created_at < cutoff)
            .cloned()
            .collect();
        open.sort_by_key(|i| i.created_at);
        open.truncate(limit);
        Ok(open)
    }

    async fn list_provisional_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<PaymentIntent>, DatabaseError> {
        let state = self.state.read().await;
        let mut held: Vec<PaymentIntent> = state
            .intents
            .values()
            .filter(|i| {
                !i.is_terminal()
                    && i.provisional
                        .as_ref()
                        .is_some_and(|p| p.observed_at <= cutoff)
            })
            .cloned()
            .collect();
        held.sort_by_key(|i| i.provisional.as_ref().map(|p| p.observed_at));
        held.truncate(limit);
        Ok(held)
    }
}
