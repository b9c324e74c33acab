use std::path::PathBuf;

pub fn default_version() -> u32 {
    1
}

pub fn default_cases_file() -> PathBuf {
    PathBuf::from("cases.json")
}

pub fn default_report_dir() -> PathBuf {
    PathBuf::from("reports")
}

pub fn default_index_file() -> PathBuf {
    PathBuf::from(".dealgauge/index.json")
}

pub fn default_model_artifact() -> PathBuf {
    PathBuf::from("models/residual.json")
}

pub fn default_concurrency() -> usize {
    5
}

pub fn default_producer_timeout_sec() -> u64 {
    60
}

pub fn default_retrieval_k() -> usize {
    5
}

pub fn default_embedding_dimension() -> usize {
    64
}

pub fn default_max_attempts() -> u32 {
    3
}

pub fn default_backoff_base_ms() -> u64 {
    500
}

pub fn default_max_rescores() -> u32 {
    2
}

pub fn default_disagreement_threshold() -> f64 {
    25.0
}

pub fn default_score_split() -> f64 {
    25.0
}

pub fn default_residual_gap() -> f64 {
    0.20
}

pub fn default_valuation_gap() -> f64 {
    0.15
}

pub fn default_overpay_pct() -> f64 {
    15.0
}

pub fn default_confident_score() -> f64 {
    75.0
}

pub fn default_search_endpoint() -> String {
    "https://api.tavily.com/search".to_string()
}

pub fn default_search_key_env() -> String {
    "TAVILY_API_KEY".to_string()
}

pub fn default_search_max_results() -> usize {
    12
}

pub fn default_valuation_endpoint() -> String {
    "https://api.carsxe.com/v2/marketvalue".to_string()
}

pub fn default_valuation_key_env() -> String {
    "CARSXE_API_KEY".to_string()
}

pub fn default_request_timeout_sec() -> u64 {
    20
}

pub fn default_llm_binary() -> PathBuf {
    PathBuf::from("claude")
}

pub fn default_llm_model() -> String {
    "claude-sonnet-4-5".to_string()
}

pub fn default_llm_timeout_sec() -> u64 {
    120
}
