use crate::config::SearchConfig;
use crate::error::CollabError;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub content: String,
}

/// Web search collaborator. Failures are producer failures, never fatal
/// to the workflow.
#[async_trait]
pub trait SearchClient: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, CollabError>;
}

/// Tavily-style JSON search API client.
pub struct HttpSearch {
    endpoint: String,
    api_key: String,
    max_results: usize,
    client: reqwest::Client,
}

impl HttpSearch {
    /// Returns `None` when no API key is configured; the caller treats the
    /// absent collaborator as a normal degraded state.
    pub fn from_config(config: &SearchConfig) -> Option<Self> {
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
            max_results: config.max_results,
            client,
        })
    }
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<RawHit>,
}

#[derive(Deserialize)]
struct RawHit {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
}

#[async_trait]
impl SearchClient for HttpSearch {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, CollabError> {
        let body = json!({
            "api_key": self.api_key,
            "query": query,
            "search_depth": "basic",
            "max_results": self.max_results,
        });

        let response = self.client.post(&self.endpoint).json(&body).send().await?;

        if response.status().as_u16() == 429 {
            return Err(CollabError::RateLimited(format!(
                "search endpoint returned 429 for '{}'",
                query
            )));
        }
        if !response.status().is_success() {
            return Err(CollabError::Network(format!(
                "search endpoint returned {}",
                response.status()
            )));
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| CollabError::Invalid(format!("unparseable search response: {}", e)))?;

        if parsed.results.is_empty() {
            return Err(CollabError::NoResults(query.to_string()));
        }

        Ok(parsed
            .results
            .into_iter()
            .map(|r| SearchHit {
                title: r.title,
                url: r.url,
                content: r.content,
            })
            .collect())
    }
}
