use crate::config::RetryConfig;
use crate::error::CollabError;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

/// Retry an operation with jittered exponential backoff. Only transient
/// errors are retried; anything else surfaces immediately.
pub async fn retry_transient<F, Fut, T>(
    config: &RetryConfig,
    mut operation: F,
) -> Result<T, CollabError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CollabError>>,
{
    let mut attempts = 0;
    let mut backoff_ms = config.backoff_base_ms;

    loop {
        attempts += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if !e.is_transient() => return Err(e),
            Err(e) if attempts >= config.max_attempts => {
                warn!("all {} attempts failed: {}", attempts, e);
                return Err(e);
            }
            Err(e) => {
                // base * 2^attempt + random(0..base)
                let jitter = rand::random::<u64>() % config.backoff_base_ms.max(1);
                let delay = Duration::from_millis(backoff_ms + jitter);
                warn!("attempt {} failed: {}. Retrying in {:?}...", attempts, e, delay);
                sleep(delay).await;
                backoff_ms = backoff_ms.saturating_mul(2);
            }
        }
    }
}

/// Validation policy for a producer whose two internal sub-scores are
/// cross-checked. Local to one node: it re-runs only the deterministic
/// sub-producer and never touches siblings or aborts the workflow.
#[derive(Debug, Clone, Copy)]
pub struct ScorePolicy {
    pub max_retries: u32,
    pub disagreement_threshold: f64,
}

impl Default for ScorePolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            disagreement_threshold: 25.0,
        }
    }
}

#[derive(Debug)]
pub struct Convergence<T> {
    pub value: T,
    pub attempts: u32,
    /// Disagreement at exit; `None` when the pair ended within threshold.
    pub unresolved_gap: Option<f64>,
}

impl ScorePolicy {
    pub fn disagrees(&self, rule_score: f64, llm_score: f64) -> bool {
        (rule_score - llm_score).abs() >= self.disagreement_threshold
    }

    /// Re-invoke `rerun` while the scores disagree, at most `max_retries`
    /// times. With the caller's initial invocation that bounds the total
    /// at `max_retries + 1`. Exhaustion accepts the result as degraded;
    /// the disagreement is reported, never hidden.
    pub async fn converge<T, F, Fut>(
        &self,
        llm_score: f64,
        initial: T,
        score_of: fn(&T) -> f64,
        mut rerun: F,
    ) -> Convergence<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CollabError>>,
    {
        let mut current = initial;
        let mut attempts = 0;

        while attempts < self.max_retries && self.disagrees(score_of(&current), llm_score) {
            attempts += 1;
            match rerun().await {
                Ok(next) => current = next,
                Err(e) => {
                    warn!("rescore attempt {} failed: {}", attempts, e);
                    break;
                }
            }
        }

        let gap = (score_of(&current) - llm_score).abs();
        Convergence {
            value: current,
            attempts,
            unresolved_gap: (gap >= self.disagreement_threshold).then_some(gap),
        }
    }
}
