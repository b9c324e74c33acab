use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::defaults::*;

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,

    /// JSON case store with input records and historical outcomes.
    #[serde(default = "default_cases_file")]
    pub cases_file: PathBuf,

    #[serde(default = "default_report_dir")]
    pub report_dir: PathBuf,

    /// Persisted vector index used by both retrieval stages.
    #[serde(default = "default_index_file")]
    pub index_file: PathBuf,

    /// Residual predictor coefficient artifact; absence means the
    /// predictor is unavailable.
    #[serde(default = "default_model_artifact")]
    pub model_artifact: PathBuf,

    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default = "default_producer_timeout_sec")]
    pub producer_timeout_sec: u64,

    /// Year used for age and mileage expectations; current year when
    /// unset.
    #[serde(default)]
    pub reference_year: Option<i32>,

    #[serde(default = "default_retrieval_k")]
    pub retrieval_k: usize,

    #[serde(default = "default_embedding_dimension")]
    pub embedding_dimension: usize,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub score_policy: ScorePolicyConfig,

    #[serde(default)]
    pub consistency: ConsistencyConfig,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub valuation: ValuationConfig,

    #[serde(default)]
    pub llm: LlmConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
        }
    }
}

/// Rule-score vs LLM-score validation policy knobs.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
pub struct ScorePolicyConfig {
    #[serde(default = "default_max_rescores")]
    pub max_retries: u32,

    #[serde(default = "default_disagreement_threshold")]
    pub disagreement_threshold: f64,
}

impl Default for ScorePolicyConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_rescores(),
            disagreement_threshold: default_disagreement_threshold(),
        }
    }
}

/// Conflict-rule thresholds, exposed so tuning them is a config change
/// rather than a code change.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
pub struct ConsistencyConfig {
    #[serde(default = "default_score_split")]
    pub score_split: f64,

    #[serde(default = "default_residual_gap")]
    pub residual_gap: f64,

    #[serde(default = "default_valuation_gap")]
    pub valuation_gap: f64,

    #[serde(default = "default_overpay_pct")]
    pub overpay_pct: f64,

    #[serde(default = "default_confident_score")]
    pub confident_score: f64,
}

impl Default for ConsistencyConfig {
    fn default() -> Self {
        Self {
            score_split: default_score_split(),
            residual_gap: default_residual_gap(),
            valuation_gap: default_valuation_gap(),
            overpay_pct: default_overpay_pct(),
            confident_score: default_confident_score(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
pub struct SearchConfig {
    #[serde(default = "default_search_endpoint")]
    pub endpoint: String,

    /// Env var holding the API key; empty or unset disables search.
    #[serde(default = "default_search_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_search_max_results")]
    pub max_results: usize,

    #[serde(default = "default_request_timeout_sec")]
    pub request_timeout_sec: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            endpoint: default_search_endpoint(),
            api_key_env: default_search_key_env(),
            max_results: default_search_max_results(),
            request_timeout_sec: default_request_timeout_sec(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
pub struct ValuationConfig {
    #[serde(default = "default_valuation_endpoint")]
    pub endpoint: String,

    /// Env var holding the API key; unset means the valuation
    /// collaborator is simply not configured.
    #[serde(default = "default_valuation_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_request_timeout_sec")]
    pub request_timeout_sec: u64,
}

impl Default for ValuationConfig {
    fn default() -> Self {
        Self {
            endpoint: default_valuation_endpoint(),
            api_key_env: default_valuation_key_env(),
            request_timeout_sec: default_request_timeout_sec(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
pub struct LlmConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_llm_binary")]
    pub binary: PathBuf,

    #[serde(default = "default_llm_model")]
    pub model: String,

    #[serde(default = "default_llm_timeout_sec")]
    pub request_timeout_sec: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            binary: default_llm_binary(),
            model: default_llm_model(),
            request_timeout_sec: default_llm_timeout_sec(),
        }
    }
}
