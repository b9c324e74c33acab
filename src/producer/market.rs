use super::{Producer, ProducerReport, Signal};
use crate::collab::{extract_json, LlmClient, SearchClient};
use crate::config::RetryConfig;
use crate::error::CollabError;
use crate::record::CarRecord;
use crate::retrieval::RetrievalFusion;
use crate::state::{DealVerdict, MarketAnalysis, Node};
use crate::workflow::{retry_transient, ScorePolicy};
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::sync::Arc;
use std::sync::OnceLock;
use tracing::{debug, warn};

const PRICE_FLOOR: f64 = 5_000.0;
const PRICE_CEILING: f64 = 120_000.0;
const IQR_MULTIPLIER: f64 = 2.0;
const IQR_MIN_SAMPLES: usize = 12;

/// Deterministic portion of the market analysis: comparables, median,
/// delta, and the rule score. Re-computable by the score policy.
#[derive(Debug, Clone)]
struct MarketCore {
    sample_count: usize,
    price_low: f64,
    price_high: f64,
    market_median: f64,
    price_delta: f64,
    price_delta_pct: f64,
    verdict: DealVerdict,
    rule_score: u8,
    rule_verdict: &'static str,
}

/// Market research producer: comparable listings via web search, a
/// rule-based score, and an independent LLM opinion cross-checked by the
/// score policy.
pub struct MarketProducer {
    search: Option<Arc<dyn SearchClient>>,
    llm: Option<Arc<dyn LlmClient>>,
    fusion: Arc<RetrievalFusion>,
    retry: RetryConfig,
    policy: ScorePolicy,
    reference_year: i32,
}

impl MarketProducer {
    pub fn new(
        search: Option<Arc<dyn SearchClient>>,
        llm: Option<Arc<dyn LlmClient>>,
        fusion: Arc<RetrievalFusion>,
        retry: RetryConfig,
        policy: ScorePolicy,
        reference_year: i32,
    ) -> Self {
        Self {
            search,
            llm,
            fusion,
            retry,
            policy,
            reference_year,
        }
    }

    /// One full deterministic research + scoring pass.
    async fn core_pass(
        &self,
        search: &Arc<dyn SearchClient>,
        record: &CarRecord,
    ) -> Result<MarketCore, CollabError> {
        let mut prices = Vec::new();
        let mut last_error = None;

        for query in build_queries(record) {
            let search = search.clone();
            let result = retry_transient(&self.retry, || {
                let search = search.clone();
                let query = query.clone();
                async move { search.search(&query).await }
            })
            .await;

            match result {
                Ok(hits) => {
                    for hit in hits {
                        let text = format!("{} {}", hit.title, hit.content);
                        let found = extract_prices(&text);
                        if !found.is_empty() {
                            debug!("{} price(s) from {}", found.len(), hit.url);
                        }
                        prices.extend(found);
                    }
                }
                Err(e) => {
                    debug!("market query '{}' failed: {}", query, e);
                    last_error = Some(e);
                }
            }
        }

        let Some(stats) = comparable_stats(&prices) else {
            return Err(last_error.unwrap_or_else(|| {
                CollabError::Invalid("no parseable comparable prices".to_string())
            }));
        };

        let price_delta = record.price_paid - stats.median;
        let price_delta_pct = price_delta / stats.median * 100.0;
        let (rule_score, rule_verdict) = rule_score(
            record,
            price_delta_pct,
            stats.sample_count,
            self.reference_year,
        );

        Ok(MarketCore {
            sample_count: stats.sample_count,
            price_low: stats.low,
            price_high: stats.high,
            market_median: stats.median,
            price_delta,
            price_delta_pct,
            verdict: DealVerdict::from_delta_pct(price_delta_pct),
            rule_score,
            rule_verdict,
        })
    }

    async fn llm_opinion(
        &self,
        llm: &Arc<dyn LlmClient>,
        record: &CarRecord,
        market_median: f64,
    ) -> Result<LlmOpinion, CollabError> {
        let context = self.fusion.context_for(record);
        let prompt = format!(
            "You are a professional used-car market analyst. Evaluate the \
             fairness of this deal and respond only with JSON \
             {{\"score\": 0-100, \"verdict\": \"...\", \"reasoning\": \"...\"}}.\n\n\
             Car: {} {} {}\nMileage: {}\nPaid: ${:.0}\nMarket median: ${:.0}\n\n\
             Context (optional):\n{}",
            record.year,
            record.make,
            record.model,
            record.mileage,
            record.price_paid,
            market_median,
            context,
        );

        let raw = llm.complete(&prompt).await?;
        let json = extract_json(&raw)
            .ok_or_else(|| CollabError::Invalid("LLM returned no JSON opinion".to_string()))?;
        let opinion: LlmOpinion = serde_json::from_str(&json)
            .map_err(|e| CollabError::Invalid(format!("bad LLM opinion: {}", e)))?;
        Ok(opinion.clamped())
    }
}

#[derive(Debug, Clone, Deserialize)]
struct LlmOpinion {
    score: f64,
    #[serde(default)]
    verdict: String,
    #[serde(default)]
    reasoning: String,
}

impl LlmOpinion {
    fn clamped(mut self) -> Self {
        self.score = self.score.clamp(0.0, 100.0);
        self
    }
}

#[async_trait]
impl Producer for MarketProducer {
    fn node(&self) -> Node {
        Node::Market
    }

    async fn produce(&self, input: &CarRecord) -> ProducerReport {
        let Some(search) = self.search.as_ref() else {
            return ProducerReport::failed(Node::Market, "search not configured");
        };

        let mut core = match self.core_pass(search, input).await {
            Ok(core) => core,
            Err(e) => return ProducerReport::failed(Node::Market, e.to_string()),
        };

        // Independent LLM opinion; its absence degrades the pair, the rule
        // side is kept and the llm side stays explicitly absent.
        let opinion = match self.llm.as_ref() {
            Some(llm) => match self.llm_opinion(llm, input, core.market_median).await {
                Ok(opinion) => opinion,
                Err(e) => {
                    warn!("llm opinion failed: {}", e);
                    let analysis = build_analysis(core, None, 0, None);
                    return ProducerReport::degraded(
                        Signal::Market(analysis),
                        format!("llm opinion failed: {}", e),
                    );
                }
            },
            None => {
                let analysis = build_analysis(core, None, 0, None);
                return ProducerReport::degraded(Signal::Market(analysis), "llm unavailable");
            }
        };

        let mut attempts = 0;
        let mut unresolved = None;

        if self.policy.disagrees(core.rule_score as f64, opinion.score) {
            let outcome = self
                .policy
                .converge(
                    opinion.score,
                    core,
                    |c| c.rule_score as f64,
                    || async move { self.core_pass(search, input).await },
                )
                .await;
            core = outcome.value;
            attempts = outcome.attempts;
            unresolved = outcome.unresolved_gap;
        }

        let analysis = build_analysis(core, Some(opinion), attempts, unresolved);
        match unresolved {
            Some(gap) => ProducerReport::degraded(
                Signal::Market(analysis),
                format!("score disagreement unresolved (gap {:.0})", gap),
            ),
            None => ProducerReport::success(Signal::Market(analysis)),
        }
    }
}

fn build_analysis(
    core: MarketCore,
    opinion: Option<LlmOpinion>,
    rescore_attempts: u32,
    unresolved_disagreement: Option<f64>,
) -> MarketAnalysis {
    MarketAnalysis {
        sample_count: core.sample_count,
        price_low: core.price_low,
        price_high: core.price_high,
        market_median: core.market_median,
        price_delta: core.price_delta,
        price_delta_pct: core.price_delta_pct,
        verdict: core.verdict,
        rule_score: core.rule_score,
        rule_verdict: core.rule_verdict.to_string(),
        llm_score: opinion.as_ref().map(|o| o.score.round() as u8),
        llm_verdict: opinion.as_ref().map(|o| o.verdict.clone()),
        llm_reasoning: opinion.map(|o| o.reasoning),
        unresolved_disagreement,
        rescore_attempts,
    }
}

fn build_queries(record: &CarRecord) -> Vec<String> {
    let CarRecord {
        year, make, model, ..
    } = record;
    vec![
        format!("used {} {} {} for sale price", year, make, model),
        format!("{} {} {} used car market value", year, make, model),
        format!("{} {} {} {} miles used car", year, make, model, record.mileage),
        format!("buy used {} {} {}", year, make, model),
    ]
}

fn price_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"\$([0-9]{1,3}(?:,[0-9]{3})+(?:\.[0-9]{2})?)",
            r"\$([0-9]{4,6})\b",
            r"(?i)(?:price|asking)[: ]+\$?([0-9]{1,3}(?:,[0-9]{3})+|[0-9]{4,6})",
            r"\b([0-9]{2,3})[kK]\b",
        ]
        .iter()
        .map(|p| Regex::new(p).unwrap())
        .collect()
    })
}

/// Pull plausible listing prices out of free text, keeping only values in
/// the used-car range.
fn extract_prices(text: &str) -> Vec<f64> {
    let mut prices = Vec::new();
    for (idx, pattern) in price_patterns().iter().enumerate() {
        for cap in pattern.captures_iter(text) {
            let Some(m) = cap.get(1) else { continue };
            let raw = m.as_str().replace(',', "");
            let Ok(mut value) = raw.parse::<f64>() else {
                continue;
            };
            // Last pattern is the bare "25k" shorthand
            if idx == price_patterns().len() - 1 {
                value *= 1_000.0;
            }
            if (PRICE_FLOOR..=PRICE_CEILING).contains(&value) {
                prices.push(value);
            }
        }
    }
    prices
}

struct ComparableStats {
    sample_count: usize,
    median: f64,
    low: f64,
    high: f64,
}

/// Dedupe, trim extreme outliers, compute the median. `None` when no
/// usable price survives.
fn comparable_stats(prices: &[f64]) -> Option<ComparableStats> {
    let mut unique: Vec<f64> = prices.to_vec();
    unique.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    unique.dedup();
    if unique.is_empty() {
        return None;
    }

    let filtered = iqr_trim(&unique);
    let samples = if filtered.len() >= 5 { filtered } else { unique };

    let n = samples.len();
    let median = if n % 2 == 0 {
        (samples[n / 2 - 1] + samples[n / 2]) / 2.0
    } else {
        samples[n / 2]
    };

    Some(ComparableStats {
        sample_count: n,
        median,
        low: samples[0],
        high: samples[n - 1],
    })
}

/// IQR outlier trim, applied only with enough samples and only when it
/// keeps most of them.
fn iqr_trim(sorted: &[f64]) -> Vec<f64> {
    if sorted.len() < IQR_MIN_SAMPLES {
        return sorted.to_vec();
    }
    let q1 = sorted[(0.25 * (sorted.len() - 1) as f64) as usize];
    let q3 = sorted[(0.75 * (sorted.len() - 1) as f64) as usize];
    let iqr = q3 - q1;
    let (low, high) = (q1 - IQR_MULTIPLIER * iqr, q3 + IQR_MULTIPLIER * iqr);

    let trimmed: Vec<f64> = sorted
        .iter()
        .copied()
        .filter(|v| (low..=high).contains(v))
        .collect();

    if trimmed.len() < 5.max((0.7 * sorted.len() as f64) as usize) {
        return sorted.to_vec();
    }
    trimmed
}

/// Rule-based 0-100 deal score over price delta, mileage, age, and sample
/// quality.
fn rule_score(
    record: &CarRecord,
    price_delta_pct: f64,
    sample_count: usize,
    reference_year: i32,
) -> (u8, &'static str) {
    let mut score: i32 = 50;

    score += match price_delta_pct {
        d if d <= -20.0 => 40,
        d if d <= -10.0 => 30,
        d if d <= -5.0 => 20,
        d if d <= 5.0 => 10,
        d if d <= 15.0 => -15,
        _ => -30,
    };

    let age = (reference_year - record.year).max(0);
    let expected_mileage = age as i64 * 12_000;
    let mileage_delta = record.mileage as i64 - expected_mileage;
    score += match mileage_delta {
        d if d <= -20_000 => 15,
        d if d <= -10_000 => 10,
        d if d <= 10_000 => 5,
        d if d <= 30_000 => -5,
        _ => -15,
    };

    if age <= 3 {
        score += 5;
    } else if age >= 10 {
        score -= 5;
    }

    if sample_count >= 10 {
        score += 10;
    }

    let score = score.clamp(0, 100) as u8;
    let verdict = match score {
        90..=100 => "Exceptional",
        75..=89 => "Good",
        60..=74 => "Fair",
        40..=59 => "Poor",
        _ => "Bad",
    };
    (score, verdict)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::SearchHit;
    use crate::retrieval::{HashedEmbedder, MemoryIndex};
    use crate::state::NodeStatus;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn record() -> CarRecord {
        CarRecord {
            id: "camry-20".to_string(),
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

    struct FixedSearch {
        prices: Vec<f64>,
        calls: AtomicU32,
    }

    #[async_trait]
    impl SearchClient for FixedSearch {
        async fn search(&self, _query: &str) -> Result<Vec<SearchHit>, CollabError> {
            // Only answer the first query so each pass sees the corpus once
            if self.calls.fetch_add(1, Ordering::SeqCst) % 4 != 0 {
                return Err(CollabError::NoResults("exhausted".to_string()));
            }
            Ok(self
                .prices
                .iter()
                .map(|p| SearchHit {
                    title: "2020 Toyota Camry for sale".to_string(),
                    url: "https://example.com".to_string(),
                    content: format!("Great condition, asking ${:.0}", p),
                })
                .collect())
        }
    }

    struct FixedLlm {
        response: String,
    }

    #[async_trait]
    impl LlmClient for FixedLlm {
        async fn complete(&self, _prompt: &str) -> Result<String, CollabError> {
            Ok(self.response.clone())
        }
    }

    fn producer(
        search: Option<Arc<dyn SearchClient>>,
        llm: Option<Arc<dyn LlmClient>>,
    ) -> MarketProducer {
        let embedder = Arc::new(HashedEmbedder::default());
        let fusion = Arc::new(RetrievalFusion::new(
            Arc::new(MemoryIndex::new()),
            embedder,
            3,
        ));
        MarketProducer::new(
            search,
            llm,
            fusion,
            RetryConfig {
                max_attempts: 1,
                backoff_base_ms: 1,
            },
            ScorePolicy::default(),
            2025,
        )
    }

    #[test]
    fn test_extract_prices_common_formats() {
        let text = "Listed at $22,500 or similar. Asking: $21000. About 19k miles? \
                    Price: $18,900 today";
        let prices = extract_prices(text);
        assert!(prices.contains(&22_500.0));
        assert!(prices.contains(&21_000.0));
        assert!(prices.contains(&19_000.0));
        assert!(prices.contains(&18_900.0));
    }

    #[test]
    fn test_extract_prices_filters_range() {
        let prices = extract_prices("junk for $300, exotic for $450,000");
        assert!(prices.is_empty());
    }

    #[test]
    fn test_median_math_acceptance_values() {
        // Construct comparables whose median is exactly 17368
        let prices = vec![15_000.0, 16_500.0, 17_368.0, 18_200.0, 19_400.0];
        let stats = comparable_stats(&prices).unwrap();
        assert_eq!(stats.median, 17_368.0);

        let paid = 22_500.0;
        let delta = paid - stats.median;
        let delta_pct = delta / stats.median * 100.0;
        assert_eq!(delta, 5_132.0);
        assert!((delta_pct - 29.55).abs() < 0.01);
    }

    #[test]
    fn test_iqr_trim_drops_extreme_outlier() {
        let mut prices: Vec<f64> = (0..14).map(|i| 17_000.0 + i as f64 * 250.0).collect();
        prices.push(95_000.0);
        prices.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let trimmed = iqr_trim(&prices);
        assert!(!trimmed.contains(&95_000.0));
        assert_eq!(trimmed.len(), prices.len() - 1);
    }

    #[test]
    fn test_iqr_trim_skipped_for_small_samples() {
        let prices = vec![15_000.0, 16_000.0, 40_000.0];
        assert_eq!(iqr_trim(&prices).len(), 3);
    }

    #[test]
    fn test_rule_score_prefers_underpriced() {
        let rec = record();
        let (under, _) = rule_score(&rec, -25.0, 12, 2025);
        let (over, _) = rule_score(&rec, 20.0, 12, 2025);
        assert!(under > over);
    }

    #[test]
    fn test_rule_score_clamped() {
        let rec = record();
        let (score, verdict) = rule_score(&rec, -50.0, 20, 2025);
        assert!(score <= 100);
        assert_eq!(verdict, "Exceptional");
    }

    #[tokio::test]
    async fn test_produce_without_search_fails() {
        let report = producer(None, None).produce(&record()).await;
        assert_eq!(report.node, Node::Market);
        assert!(matches!(report.status, NodeStatus::Failed { .. }));
        assert!(report.signal.is_none());
    }

    #[tokio::test]
    async fn test_produce_without_llm_degrades_with_rule_side_kept() {
        let search: Arc<dyn SearchClient> = Arc::new(FixedSearch {
            prices: vec![15_000.0, 16_500.0, 17_368.0, 18_200.0, 19_400.0],
            calls: AtomicU32::new(0),
        });
        let report = producer(Some(search), None).produce(&record()).await;

        assert_eq!(report.status, NodeStatus::degraded("llm unavailable"));
        let Some(Signal::Market(analysis)) = report.signal else {
            panic!("expected market signal");
        };
        assert_eq!(analysis.market_median, 17_368.0);
        assert!(analysis.llm_score.is_none());
        assert_eq!(analysis.verdict, DealVerdict::Unfavorable);
    }

    #[tokio::test]
    async fn test_produce_with_agreeing_llm_succeeds() {
        let search: Arc<dyn SearchClient> = Arc::new(FixedSearch {
            prices: vec![15_000.0, 16_500.0, 17_368.0, 18_200.0, 19_400.0],
            calls: AtomicU32::new(0),
        });
        let llm: Arc<dyn LlmClient> = Arc::new(FixedLlm {
            response: r#"{"score": 30, "verdict": "Poor", "reasoning": "well over market"}"#
                .to_string(),
        });
        let report = producer(Some(search), Some(llm)).produce(&record()).await;

        assert_eq!(report.status, NodeStatus::Success);
        let Some(Signal::Market(analysis)) = report.signal else {
            panic!("expected market signal");
        };
        assert_eq!(analysis.llm_score, Some(30));
        assert_eq!(analysis.rescore_attempts, 0);
        assert!(analysis.unresolved_disagreement.is_none());
    }

    #[tokio::test]
    async fn test_persistent_disagreement_degrades_and_records_gap() {
        let search: Arc<dyn SearchClient> = Arc::new(FixedSearch {
            // Deep underprice: rule score lands high while the LLM says 5
            prices: vec![28_000.0, 29_500.0, 30_368.0, 31_200.0, 32_400.0],
            calls: AtomicU32::new(0),
        });
        let llm: Arc<dyn LlmClient> = Arc::new(FixedLlm {
            response: r#"{"score": 5, "verdict": "Bad", "reasoning": "suspicious listing"}"#
                .to_string(),
        });
        let report = producer(Some(search), Some(llm)).produce(&record()).await;

        assert!(matches!(report.status, NodeStatus::Degraded { .. }));
        let Some(Signal::Market(analysis)) = report.signal else {
            panic!("expected market signal");
        };
        assert!(analysis.unresolved_disagreement.is_some());
        assert_eq!(analysis.rescore_attempts, 2);
    }
}
