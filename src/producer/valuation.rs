use super::{Producer, ProducerReport, Signal};
use crate::collab::ValuationClient;
use crate::config::RetryConfig;
use crate::error::CollabError;
use crate::record::CarRecord;
use crate::state::{ExternalValuation, Node};
use crate::workflow::retry_transient;
use async_trait::async_trait;
use std::sync::Arc;

/// Third-party valuation lookup. An unconfigured client is the normal
/// state and degrades silently into an absent signal.
pub struct ValuationProducer {
    client: Option<Arc<dyn ValuationClient>>,
    retry: RetryConfig,
}

impl ValuationProducer {
    pub fn new(client: Option<Arc<dyn ValuationClient>>, retry: RetryConfig) -> Self {
        Self { client, retry }
    }
}

#[async_trait]
impl Producer for ValuationProducer {
    fn node(&self) -> Node {
        Node::Valuation
    }

    async fn produce(&self, input: &CarRecord) -> ProducerReport {
        let Some(client) = self.client.as_ref() else {
            return ProducerReport::failed(Node::Valuation, CollabError::NotConfigured.to_string());
        };

        let result = retry_transient(&self.retry, || {
            let client = client.clone();
            let input = input.clone();
            async move { client.lookup(&input).await }
        })
        .await;

        match result {
            Ok(estimate) => ProducerReport::success(Signal::Valuation(ExternalValuation {
                estimate,
                source: client.source().to_string(),
            })),
            Err(e) => ProducerReport::failed(Node::Valuation, e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CollabError;
    use crate::state::NodeStatus;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyValuation {
        calls: AtomicU32,
    }

    #[async_trait]
    impl ValuationClient for FlakyValuation {
        async fn lookup(&self, _record: &CarRecord) -> Result<f64, CollabError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(CollabError::Network("connection reset".to_string()))
            } else {
                Ok(18_250.0)
            }
        }

        fn source(&self) -> &str {
            "test-valuation"
        }
    }

    fn record() -> CarRecord {
        CarRecord {
            id: "x".to_string(),
            year: 2020,
            make: "Toyota".to_string(),
            model: "Camry".to_string(),
            mileage: 35_000,
            price_paid: 22_500.0,
            accident_history: None,
            clean_title: true,
            horsepower: None,
            engine_liters: None,
            fuel_type: None,
            transmission: None,
        }
    }

    #[tokio::test]
    async fn test_unconfigured_is_absent_not_error() {
        let producer = ValuationProducer::new(
            None,
            RetryConfig {
                max_attempts: 2,
                backoff_base_ms: 1,
            },
        );
        let report = producer.produce(&record()).await;
        assert_eq!(
            report.status,
            NodeStatus::failed("collaborator not configured")
        );
        assert!(report.signal.is_none());
    }

    #[tokio::test]
    async fn test_transient_error_retried() {
        let producer = ValuationProducer::new(
            Some(Arc::new(FlakyValuation {
                calls: AtomicU32::new(0),
            })),
            RetryConfig {
                max_attempts: 2,
                backoff_base_ms: 1,
            },
        );
        let report = producer.produce(&record()).await;
        assert_eq!(report.status, NodeStatus::Success);
        let Some(Signal::Valuation(valuation)) = report.signal else {
            panic!("expected valuation signal");
        };
        assert_eq!(valuation.estimate, 18_250.0);
    }
}
