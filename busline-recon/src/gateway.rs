use async_trait::async_trait;
use busline_domain::booking::PaymentStatus;
use std::collections::{HashMap, VecDeque};
use tokio::sync::Mutex;

/// What the processor reports for a transaction reference.
#[derive(Debug, Clone)]
pub struct GatewayVerification {
    /// Provider status word, e.g. "success", "completed", "failed", "pending".
    pub status: String,
    pub transaction_id: String,
    pub amount_cents: i64,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    /// Network trouble or timeout; the booking stays stale and is retried on
    /// the next reconciliation cycle.
    #[error("Transient gateway error: {0}")]
    Transient(String),

    /// The provider answered with something we cannot interpret.
    #[error("Gateway protocol error: {0}")]
    Protocol(String),
}

/// Verify-by-reference contract against the external payment processor.
/// The engine only consumes this; provider integrations live elsewhere.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn verify(
        &self,
        transaction_reference: &str,
    ) -> Result<GatewayVerification, GatewayError>;
}

/// Map a provider status word onto the payment lifecycle. `None` means the
/// provider has not decided yet; leave the booking for a later cycle.
/// Anything that is not success-like or pending is treated as a failure.
pub fn map_gateway_status(status: &str) -> Option<PaymentStatus> {
    match status.to_ascii_lowercase().as_str() {
        "success" | "completed" => Some(PaymentStatus::Paid),
        "pending" => None,
        _ => Some(PaymentStatus::Failed),
    }
}

/// Scripted gateway for tests: queue outcomes per reference. An unknown or
/// exhausted reference behaves like a network failure, which is what a real
/// provider outage looks like to the scheduler.
#[derive(Default)]
pub struct MockGateway {
    responses: Mutex<HashMap<String, VecDeque<Result<GatewayVerification, GatewayError>>>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn script(
        &self,
        reference: &str,
        outcome: Result<GatewayVerification, GatewayError>,
    ) {
        self.responses
            .lock()
            .await
            .entry(reference.to_string())
            .or_default()
            .push_back(outcome);
    }

    pub fn verification(status: &str, transaction_id: &str, amount_cents: i64) -> GatewayVerification {
        GatewayVerification {
            status: status.to_string(),
            transaction_id: transaction_id.to_string(),
            amount_cents,
        }
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn verify(
        &self,
        transaction_reference: &str,
    ) -> Result<GatewayVerification, GatewayError> {
        self.responses
            .lock()
            .await
            .get_mut(transaction_reference)
            .and_then(|queue| queue.pop_front())
            .unwrap_or_else(|| {
                Err(GatewayError::Transient(format!(
                    "no response for {transaction_reference}"
                )))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(map_gateway_status("success"), Some(PaymentStatus::Paid));
        assert_eq!(map_gateway_status("COMPLETED"), Some(PaymentStatus::Paid));
        assert_eq!(map_gateway_status("pending"), None);
        assert_eq!(map_gateway_status("failed"), Some(PaymentStatus::Failed));
        // unknown terminal-looking words fail closed
        assert_eq!(map_gateway_status("declined"), Some(PaymentStatus::Failed));
    }

    #[tokio::test]
    async fn test_mock_gateway_plays_back_in_order() {
        let gateway = MockGateway::new();
        gateway
            .script("tx-1", Err(GatewayError::Transient("down".to_string())))
            .await;
        gateway
            .script("tx-1", Ok(MockGateway::verification("success", "tx-1", 1000)))
            .await;

        assert!(gateway.verify("tx-1").await.is_err());
        assert_eq!(gateway.verify("tx-1").await.unwrap().status, "success");
        // exhausted queue looks like an outage
        assert!(gateway.verify("tx-1").await.is_err());
    }
}
