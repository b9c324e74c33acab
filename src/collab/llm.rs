use crate::config::LlmConfig;
use crate::error::CollabError;
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout as tokio_timeout;
use tracing::debug;

/// Language-model collaborator. Every call site must define behavior for
/// an unavailable client that does not abort the workflow; call sites hold
/// an `Option<Arc<dyn LlmClient>>` and treat `None` as unavailable.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, CollabError>;
}

/// Shells out to a local LLM CLI in one-shot prompt mode.
pub struct CliLlm {
    binary: PathBuf,
    model: String,
    timeout: Duration,
}

impl CliLlm {
    pub fn from_config(config: &LlmConfig) -> Option<Self> {
        if !config.enabled {
            return None;
        }
        Some(Self {
            binary: config.binary.clone(),
            model: config.model.clone(),
            timeout: Duration::from_secs(config.request_timeout_sec),
        })
    }
}

#[async_trait]
impl LlmClient for CliLlm {
    async fn complete(&self, prompt: &str) -> Result<String, CollabError> {
        // Plain command names go through PATH lookup
        let binary_str = self.binary.to_string_lossy();
        let mut cmd = if binary_str.contains('/') || binary_str.contains('\\') {
            Command::new(&self.binary)
        } else {
            Command::new(binary_str.as_ref())
        };

        cmd.arg("-p").arg(prompt).arg("--model").arg(&self.model);

        let output = tokio_timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| CollabError::Timeout(self.timeout))?
            .map_err(CollabError::Io)?;

        if !output.status.success() {
            return Err(CollabError::NonZeroExit {
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        debug!("llm responded with {} bytes", stdout.len());
        Ok(stdout)
    }
}

/// Extract a JSON object from LLM output that may be wrapped in markdown
/// code fences or surrounded by prose.
pub fn extract_json(s: &str) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.starts_with('{') && serde_json::from_str::<serde_json::Value>(trimmed).is_ok() {
        return Some(trimmed.to_string());
    }

    let fence = regex::Regex::new(r"```(?:json)?\s*\n?([\s\S]*?)\n?```").ok()?;
    for cap in fence.captures_iter(s) {
        let candidate = cap.get(1)?.as_str().trim();
        if serde_json::from_str::<serde_json::Value>(candidate).is_ok() {
            return Some(candidate.to_string());
        }
    }

    // Last resort: widest brace-delimited span that parses
    let start = s.find('{')?;
    let end = s.rfind('}')?;
    if end > start {
        let candidate = &s[start..=end];
        if serde_json::from_str::<serde_json::Value>(candidate).is_ok() {
            return Some(candidate.to_string());
        }
    }
    None
}
