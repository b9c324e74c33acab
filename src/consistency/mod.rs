use crate::collab::{extract_json, LlmClient};
use crate::state::AnalysisState;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, warn};

/// Thresholds for the pairwise comparison rules; tunable from config.
#[derive(Debug, Clone)]
pub struct ConsistencyThresholds {
    /// Rule 1: |rule_score − llm_score| ≥ this triggers.
    pub score_split: f64,
    /// Rule 2: relative residual/market gap ≥ this triggers.
    pub residual_gap: f64,
    /// Rule 3: relative valuation/market gap ≥ this triggers.
    pub valuation_gap: f64,
    /// Rule 4: price_delta_pct > this, gated on a confident rule score.
    pub overpay_pct: f64,
    pub confident_score: f64,
}

impl Default for ConsistencyThresholds {
    fn default() -> Self {
        Self {
            score_split: 25.0,
            residual_gap: 0.20,
            valuation_gap: 0.15,
            overpay_pct: 15.0,
            confident_score: 75.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    /// Monotonic in how far the metric exceeds its threshold.
    fn from_ratio(ratio: f64) -> Self {
        if ratio >= 2.0 {
            Severity::High
        } else if ratio >= 1.4 {
            Severity::Medium
        } else {
            Severity::Low
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
        }
    }
}

/// One detected disagreement between two signals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conflict {
    pub pair: String,
    pub metric: String,
    pub value: f64,
    pub threshold: f64,
    pub severity: Severity,
    pub detail: String,
    pub action: String,
    /// LLM note; empty string when the collaborator is unavailable.
    #[serde(default)]
    pub annotation: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsistencyReport {
    pub conflicts: Vec<Conflict>,
}

/// Only the numeric signals the comparison rules consume, pulled from
/// resolved fields so failed producers are invisible here.
#[derive(Debug, Default)]
struct SignalView {
    rule_score: Option<f64>,
    llm_score: Option<f64>,
    market_median: Option<f64>,
    price_delta_pct: Option<f64>,
    residual: Option<f64>,
    valuation: Option<f64>,
}

impl SignalView {
    fn from_state(state: &AnalysisState) -> Self {
        let mut view = SignalView::default();
        if let Some(market) = state.market_resolved() {
            view.rule_score = Some(market.rule_score as f64);
            view.llm_score = market.llm_score.map(|s| s as f64);
            view.market_median = Some(market.market_median);
            view.price_delta_pct = Some(market.price_delta_pct);
        }
        if let Some(residual) = state.residual_resolved() {
            view.residual = Some(residual.predicted_price);
        }
        if let Some(valuation) = state.valuation_resolved() {
            view.valuation = Some(valuation.estimate);
        }
        view
    }
}

/// A comparison rule: evaluates to `(value, threshold, detail)` when both
/// operands are present and the threshold is crossed, `None` otherwise.
struct ConflictRule {
    pair: &'static str,
    metric: &'static str,
    action: &'static str,
    eval: fn(&SignalView, &ConsistencyThresholds) -> Option<(f64, f64, String)>,
}

fn eval_score_split(
    view: &SignalView,
    t: &ConsistencyThresholds,
) -> Option<(f64, f64, String)> {
    let rule = view.rule_score?;
    let llm = view.llm_score?;
    let gap = (rule - llm).abs();
    (gap >= t.score_split).then(|| {
        (
            gap,
            t.score_split,
            format!("rule score {:.0} vs LLM score {:.0}", rule, llm),
        )
    })
}

fn eval_residual_vs_market(
    view: &SignalView,
    t: &ConsistencyThresholds,
) -> Option<(f64, f64, String)> {
    let residual = view.residual?;
    let median = view.market_median.filter(|m| *m > 0.0)?;
    let gap = (residual - median).abs() / median;
    (gap >= t.residual_gap).then(|| {
        (
            gap,
            t.residual_gap,
            format!(
                "residual ${:.0} vs market ${:.0} ({:+.1}%)",
                residual,
                median,
                (residual - median) / median * 100.0
            ),
        )
    })
}

fn eval_valuation_vs_market(
    view: &SignalView,
    t: &ConsistencyThresholds,
) -> Option<(f64, f64, String)> {
    let valuation = view.valuation?;
    let median = view.market_median.filter(|m| *m > 0.0)?;
    let gap = (valuation - median).abs() / median;
    (gap >= t.valuation_gap).then(|| {
        (
            gap,
            t.valuation_gap,
            format!(
                "external ${:.0} vs market ${:.0} ({:+.1}%)",
                valuation,
                median,
                (valuation - median) / median * 100.0
            ),
        )
    })
}

fn eval_overpay_high_score(
    view: &SignalView,
    t: &ConsistencyThresholds,
) -> Option<(f64, f64, String)> {
    let delta_pct = view.price_delta_pct?;
    let rule = view.rule_score?;
    (delta_pct > t.overpay_pct && rule >= t.confident_score).then(|| {
        (
            delta_pct,
            t.overpay_pct,
            format!(
                "overpaid {:+.1}% yet rule score is a confident {:.0}",
                delta_pct, rule
            ),
        )
    })
}

static RULES: &[ConflictRule] = &[
    ConflictRule {
        pair: "rule_score/llm_score",
        metric: "score_gap",
        action: "Revisit market comps or regenerate the LLM opinion",
        eval: eval_score_split,
    },
    ConflictRule {
        pair: "residual/market_median",
        metric: "relative_gap",
        action: "Check predictor features and mileage normalization against comps",
        eval: eval_residual_vs_market,
    },
    ConflictRule {
        pair: "external_valuation/market_median",
        metric: "relative_gap",
        action: "Prefer the source with better coverage or blend the references",
        eval: eval_valuation_vs_market,
    },
    ConflictRule {
        pair: "price_delta/rule_score",
        metric: "price_delta_pct",
        action: "Explain the premium (rare trim, options) or lower the score",
        eval: eval_overpay_high_score,
    },
];

pub struct ConsistencyEngine {
    thresholds: ConsistencyThresholds,
}

impl ConsistencyEngine {
    pub fn new(thresholds: ConsistencyThresholds) -> Self {
        Self { thresholds }
    }

    /// Evaluate every rule whose operands are both present. Never errors on
    /// missing signals; an empty conflict list is a valid result.
    pub fn evaluate(&self, state: &AnalysisState) -> ConsistencyReport {
        let view = SignalView::from_state(state);
        let conflicts = RULES
            .iter()
            .filter_map(|rule| {
                (rule.eval)(&view, &self.thresholds).map(|(value, threshold, detail)| Conflict {
                    pair: rule.pair.to_string(),
                    metric: rule.metric.to_string(),
                    value,
                    threshold,
                    severity: Severity::from_ratio(value / threshold),
                    detail,
                    action: rule.action.to_string(),
                    annotation: String::new(),
                })
            })
            .collect();
        ConsistencyReport { conflicts }
    }

    /// Attach LLM annotations to the conflicts; collaborator absence or
    /// failure leaves annotations empty and never blocks the report.
    pub async fn annotate(
        &self,
        report: &mut ConsistencyReport,
        state: &AnalysisState,
        llm: Option<&Arc<dyn LlmClient>>,
    ) {
        let Some(llm) = llm else { return };
        if report.conflicts.is_empty() {
            return;
        }

        let mut prompt = String::from(
            "You are a pricing QA assistant. For each numbered disagreement \
             below, write one short note (max 25 words) on the likeliest cause. \
             Respond as JSON: {\"annotations\": [\"...\", ...]} in order.\n\n",
        );
        let _ = writeln!(prompt, "Car: {}", state.input.description());
        for (i, conflict) in report.conflicts.iter().enumerate() {
            let _ = writeln!(prompt, "{}. [{}] {}", i + 1, conflict.pair, conflict.detail);
        }

        #[derive(Deserialize)]
        struct Annotations {
            annotations: Vec<String>,
        }

        match llm.complete(&prompt).await {
            Ok(raw) => {
                let parsed = extract_json(&raw)
                    .and_then(|json| serde_json::from_str::<Annotations>(&json).ok());
                match parsed {
                    Some(parsed) => {
                        for (conflict, note) in
                            report.conflicts.iter_mut().zip(parsed.annotations)
                        {
                            conflict.annotation = note;
                        }
                    }
                    None => debug!("conflict annotations unparseable, leaving empty"),
                }
            }
            Err(e) => warn!("conflict annotation failed: {}", e),
        }
    }
}
