use crate::config::ValuationConfig;
use crate::error::CollabError;
use crate::record::CarRecord;
use async_trait::async_trait;
use std::time::Duration;

/// External valuation collaborator. Absence of configuration is a normal,
/// expected state, represented by not constructing a client at all.
#[async_trait]
pub trait ValuationClient: Send + Sync {
    async fn lookup(&self, record: &CarRecord) -> Result<f64, CollabError>;

    fn source(&self) -> &str;
}

/// Third-party valuation HTTP API client.
pub struct HttpValuation {
    endpoint: String,
    api_key: String,
    client: reqwest::Client,
}

// Providers disagree on the field name for their averaged estimate
const ESTIMATE_KEYS: [&str; 4] = [
    "averageMarketPrice",
    "average_market_price",
    "average_price",
    "average",
];

impl HttpValuation {
    pub fn from_config(config: &ValuationConfig) -> Option<Self> {
        let api_key = std::env::var(&config.api_key_env).ok()?;
        if api_key.is_empty() {
            return None;
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_sec))
            .build()
            .ok()?;
        Some(Self {
            endpoint: config.endpoint.clone(),
            api_key,
            client,
        })
    }

    fn extract_estimate(payload: &serde_json::Value) -> Option<f64> {
        ESTIMATE_KEYS
            .iter()
            .find_map(|key| payload.get(key).and_then(|v| v.as_f64()))
    }
}

#[async_trait]
impl ValuationClient for HttpValuation {
    async fn lookup(&self, record: &CarRecord) -> Result<f64, CollabError> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("key", self.api_key.as_str()),
                ("make", record.make.as_str()),
                ("model", record.model.as_str()),
            ])
            .query(&[("year", record.year)])
            .query(&[("mileage", record.mileage)])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(CollabError::Network(format!(
                "valuation endpoint returned {}",
                response.status()
            )));
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| CollabError::Invalid(format!("unparseable valuation response: {}", e)))?;

        Self::extract_estimate(&payload).ok_or_else(|| {
            CollabError::Invalid("valuation response carries no estimate field".to_string())
        })
    }

    fn source(&self) -> &str {
        &self.endpoint
    }
}
