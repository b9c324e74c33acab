mod defaults;
mod types;

pub use types::*;

use crate::consistency::ConsistencyThresholds;
use crate::error::ConfigError;
use crate::workflow::ScorePolicy;
use defaults::*;
use std::path::Path;
use tracing::info;

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            cases_file: default_cases_file(),
            report_dir: default_report_dir(),
            index_file: default_index_file(),
            model_artifact: default_model_artifact(),
            concurrency: default_concurrency(),
            producer_timeout_sec: default_producer_timeout_sec(),
            reference_year: None,
            retrieval_k: default_retrieval_k(),
            embedding_dimension: default_embedding_dimension(),
            retry: RetryConfig::default(),
            score_policy: ScorePolicyConfig::default(),
            consistency: ConsistencyConfig::default(),
            search: SearchConfig::default(),
            valuation: ValuationConfig::default(),
            llm: LlmConfig::default(),
        }
    }
}

impl Config {
    /// Load config from a YAML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Load from the given path, falling back to defaults when the default
    /// config file is simply absent.
    pub fn load_or_default(path: &Path, explicit: bool) -> Result<Self, ConfigError> {
        if !path.exists() && !explicit {
            info!("no config at {:?}, using defaults", path);
            return Ok(Config::default());
        }
        Self::load(path)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.producer_timeout_sec == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        for (rule, value) in [
            ("score_split", self.consistency.score_split),
            ("residual_gap", self.consistency.residual_gap),
            ("valuation_gap", self.consistency.valuation_gap),
            ("overpay_pct", self.consistency.overpay_pct),
            (
                "disagreement_threshold",
                self.score_policy.disagreement_threshold,
            ),
        ] {
            if value <= 0.0 || !value.is_finite() {
                return Err(ConfigError::InvalidThreshold {
                    rule: rule.to_string(),
                    value,
                });
            }
        }
        Ok(())
    }

    pub fn thresholds(&self) -> ConsistencyThresholds {
        ConsistencyThresholds {
            score_split: self.consistency.score_split,
            residual_gap: self.consistency.residual_gap,
            valuation_gap: self.consistency.valuation_gap,
            overpay_pct: self.consistency.overpay_pct,
            confident_score: self.consistency.confident_score,
        }
    }

    pub fn policy(&self) -> ScorePolicy {
        ScorePolicy {
            max_retries: self.score_policy.max_retries,
            disagreement_threshold: self.score_policy.disagreement_threshold,
        }
    }
}
