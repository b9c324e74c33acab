use std::path::PathBuf;
use thiserror::Error;

#[allow(dead_code)]
#[derive(Error, Debug)]
pub enum DealgaugeError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Collaborator error: {0}")]
    Collab(#[from] CollabError),

    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("Output error: {0}")]
    Output(#[from] OutputError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid threshold for rule '{rule}': {value}")]
    InvalidThreshold { rule: String, value: f64 },

    #[error("Producer timeout must be non-zero")]
    ZeroTimeout,
}

/// Errors from external collaborators (search, LLM, predictor, valuation).
///
/// `NotConfigured` is an expected state and degrades silently, the
/// transient variants are eligible for bounded retry, `Invalid` marks the
/// producing node failed.
#[derive(Error, Debug)]
pub enum CollabError {
    #[error("collaborator not configured")]
    NotConfigured,

    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("network error: {0}")]
    Network(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("no results for query '{0}'")]
    NoResults(String),

    #[error("invalid collaborator output: {0}")]
    Invalid(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("process failed with exit code {code}: {stderr}")]
    NonZeroExit { code: i32, stderr: String },
}

impl CollabError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CollabError::Timeout(_) | CollabError::Network(_) | CollabError::RateLimited(_)
        )
    }
}

impl From<reqwest::Error> for CollabError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            CollabError::Timeout(std::time::Duration::ZERO)
        } else if e.status().map(|s| s.as_u16() == 429).unwrap_or(false) {
            CollabError::RateLimited(e.to_string())
        } else {
            CollabError::Network(e.to_string())
        }
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to read case file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse case file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("No case with id '{0}'")]
    UnknownCase(String),

    #[error("Case file contains no records")]
    Empty,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum WorkflowError {
    /// The workflow could not start or its runtime broke underneath it;
    /// producer-level failures never surface here, they degrade instead.
    #[error("Workflow aborted: {0}")]
    Fatal(String),
}

#[derive(Error, Debug)]
pub enum OutputError {
    #[error("Failed to create report directory: {0}")]
    CreateDir(std::io::Error),

    #[error("Failed to write report: {0}")]
    WriteReport(std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
