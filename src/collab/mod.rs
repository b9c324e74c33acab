mod llm;
mod predictor;
mod search;
mod valuation;

pub use llm::{extract_json, CliLlm, LlmClient};
pub use predictor::{ArtifactModel, Prediction, ResidualPredictor};
pub use search::{HttpSearch, SearchClient, SearchHit};
pub use valuation::{HttpValuation, ValuationClient};
