//! Primary/secondary gateway with bounded retries
//!
//! The same idempotency key is sent on every attempt and to both endpoints,
//! so a request that reached the primary before timing out resolves to the
//! same intent on retry.

use super::{CreateIntentRequest, GatewayError, GatewayIntent, PaymentGateway};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts per endpoint, including the first.
    pub attempts: u32,
    /// Sleep before retry N (the last entry repeats).
    pub backoff: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
            ],
        }
    }
}

impl RetryPolicy {
    fn delay(&self, retry: usize) -> Duration {
        self.backoff
            .get(retry)
            .or_else(|| self.backoff.last())
            .copied()
            .unwrap_or_default()
    }
}

pub struct FailoverGateway {
    primary: Arc<dyn PaymentGateway>,
    secondary: Option<Arc<dyn PaymentGateway>>,
    policy: RetryPolicy,
}

impl FailoverGateway {
    pub fn new(
        primary: Arc<dyn PaymentGateway>,
        secondary: Option<Arc<dyn PaymentGateway>>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            primary,
            secondary,
            policy,
        }
    }

    async fn with_retries<T, F, Fut>(
        &self,
        endpoint: &Arc<dyn PaymentGateway>,
        op: &F,
    ) -> Result<T, GatewayError>
    where
        F: Fn(Arc<dyn PaymentGateway>) -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        let attempts = self.policy.attempts.max(1);
        let mut attempt = 0;
        loop {
            match op(endpoint.clone()).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt + 1 < attempts => {
                    let delay = self.policy.delay(attempt as usize);
                    warn!(
                        gateway = %endpoint.name(),
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient gateway failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn call<T, F, Fut>(&self, op: F) -> Result<T, GatewayError>
    where
        F: Fn(Arc<dyn PaymentGateway>) -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        match self.with_retries(&self.primary, &op).await {
            Err(e) if e.is_transient() => match &self.secondary {
                Some(secondary) => {
                    warn!(
                        primary = %self.primary.name(),
                        secondary = %secondary.name(),
                        error = %e,
                        "Primary gateway exhausted, failing over"
                    );
                    self.with_retries(secondary, &op).await
                }
                None => Err(e),
            },
            other => other,
        }
    }
}

#[async_trait::async_trait]
impl PaymentGateway for FailoverGateway {
    fn name(&self) -> &str {
        self.primary.name()
    }

    async fn create_intent(
        &self,
        request: &CreateIntentRequest,
    ) -> Result<GatewayIntent, GatewayError> {
        self.call(|gateway| {
            let request = request.clone();
            async move { gateway.create_intent(&request).await }
        })
        .await
    }

    async fn get_intent(&self, intent_id: &str) -> Result<GatewayIntent, GatewayError> {
        self.call(|gateway| {
            let intent_id = intent_id.to_string();
            async move { gateway.get_intent(&intent_id).await }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MockGateway;
    use rust_decimal_macros::dec;

    fn request(key: &str) -> CreateIntentRequest {
        CreateIntentRequest {
            user_id: "u1".into(),
            amount: dec!(500.00),
            idempotency_key: key.into(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_primary_then_succeeds() {
        let primary = Arc::new(MockGateway::new("primary"));
        primary.fail_next_create(GatewayError::Timeout("t1".into()));
        primary.fail_next_create(GatewayError::Network("t2".into()));

        let gateway = FailoverGateway::new(primary.clone(), None, RetryPolicy::default());
        let intent = gateway.create_intent(&request("k1")).await.unwrap();

        assert_eq!(primary.create_calls(), 3);
        assert!(intent.checkout_url.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fails_over_with_same_idempotency_key() {
        let primary = Arc::new(MockGateway::new("primary"));
        for _ in 0..3 {
            primary.fail_next_create(GatewayError::Server { status: 503, message: "down".into() });
        }
        let secondary = Arc::new(MockGateway::new("secondary"));

        let gateway =
            FailoverGateway::new(primary.clone(), Some(secondary.clone()), RetryPolicy::default());
        let first = gateway.create_intent(&request("k1")).await.unwrap();
        let second = gateway.create_intent(&request("k1")).await.unwrap();

        assert_eq!(primary.create_calls(), 3 + 1);
        assert_eq!(secondary.create_calls(), 1);
        assert_eq!(secondary.last_idempotency_key().as_deref(), Some("k1"));
        assert!(first.intent_id.starts_with("pi_"));
        assert!(second.checkout_url.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_is_not_retried() {
        let primary = Arc::new(MockGateway::new("primary"));
        primary.fail_next_create(GatewayError::Rejected { status: 422, message: "bad".into() });
        let secondary = Arc::new(MockGateway::new("secondary"));

        let gateway =
            FailoverGateway::new(primary.clone(), Some(secondary.clone()), RetryPolicy::default());
        let err = gateway.create_intent(&request("k1")).await.unwrap_err();

        assert!(matches!(err, GatewayError::Rejected { status: 422, .. }));
        assert_eq!(primary.create_calls(), 1);
        assert_eq!(secondary.create_calls(), 0);
    }

    #[test]
    fn test_backoff_repeats_last_delay() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(0), Duration::from_secs(1));
        assert_eq!(policy.delay(2), Duration::from_secs(4));
        assert_eq!(policy.delay(9), Duration::from_secs(4));
    }
}
