use crate::consistency::ConsistencyReport;
use crate::output::DealReport;
use crate::record::CarRecord;
use crate::retrieval::{LateRetrieval, RetrievalBrief};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Workflow nodes, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Node {
    Condition,
    Market,
    Residual,
    News,
    Valuation,
    EarlyRetrieval,
    Consistency,
    LateRetrieval,
    Summary,
}

impl Node {
    pub const ALL: [Node; 9] = [
        Node::Condition,
        Node::Market,
        Node::Residual,
        Node::News,
        Node::Valuation,
        Node::EarlyRetrieval,
        Node::Consistency,
        Node::LateRetrieval,
        Node::Summary,
    ];
}

impl std::fmt::Display for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Node::Condition => "condition",
            Node::Market => "market",
            Node::Residual => "residual",
            Node::News => "news",
            Node::Valuation => "valuation",
            Node::EarlyRetrieval => "early_retrieval",
            Node::Consistency => "consistency",
            Node::LateRetrieval => "late_retrieval",
            Node::Summary => "summary",
        };
        write!(f, "{}", name)
    }
}

/// Authoritative record of what actually happened to a node.
///
/// Downstream readers must treat `Failed` and `NotRun` fields as absent;
/// `Degraded` carries partial data with reduced confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NodeStatus {
    NotRun,
    Success,
    Degraded { reason: String },
    Failed { reason: String },
}

impl NodeStatus {
    pub fn degraded(reason: impl Into<String>) -> Self {
        NodeStatus::Degraded {
            reason: reason.into(),
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        NodeStatus::Failed {
            reason: reason.into(),
        }
    }

    /// A resolved node produced data worth reading (possibly partial).
    pub fn is_usable(&self) -> bool {
        matches!(self, NodeStatus::Success | NodeStatus::Degraded { .. })
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeStatus::NotRun => write!(f, "not_run"),
            NodeStatus::Success => write!(f, "success"),
            NodeStatus::Degraded { reason } => write!(f, "degraded: {}", reason),
            NodeStatus::Failed { reason } => write!(f, "failed: {}", reason),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MileageBand {
    Low,
    Average,
    High,
}

impl MileageBand {
    /// Band against the usual 12k miles/year expectation.
    pub fn for_car(mileage: u32, age_years: i32) -> Self {
        let expected = (age_years.max(0) as i64) * 12_000;
        let delta = mileage as i64 - expected;
        if delta <= -10_000 {
            MileageBand::Low
        } else if delta <= 10_000 {
            MileageBand::Average
        } else {
            MileageBand::High
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionReport {
    pub summary: String,
    pub mileage_band: MileageBand,
    pub accident_history: String,
    pub clean_title: bool,
}

/// Deal verdict from fixed price-delta-percentage bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DealVerdict {
    StronglyFavorable,
    Favorable,
    Fair,
    Unfavorable,
    StronglyUnfavorable,
}

impl DealVerdict {
    pub fn from_delta_pct(delta_pct: f64) -> Self {
        if delta_pct <= -30.0 {
            DealVerdict::StronglyFavorable
        } else if delta_pct <= -10.0 {
            DealVerdict::Favorable
        } else if delta_pct < 10.0 {
            DealVerdict::Fair
        } else if delta_pct < 30.0 {
            DealVerdict::Unfavorable
        } else {
            DealVerdict::StronglyUnfavorable
        }
    }
}

impl std::fmt::Display for DealVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DealVerdict::StronglyFavorable => "strongly favorable",
            DealVerdict::Favorable => "favorable",
            DealVerdict::Fair => "fair",
            DealVerdict::Unfavorable => "unfavorable",
            DealVerdict::StronglyUnfavorable => "strongly unfavorable",
        };
        write!(f, "{}", name)
    }
}

/// Market producer output. The rule score and the LLM score form a pair:
/// either both are meaningful or the whole analysis is marked degraded
/// with the missing side left as `None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketAnalysis {
    pub sample_count: usize,
    pub price_low: f64,
    pub price_high: f64,
    pub market_median: f64,
    pub price_delta: f64,
    pub price_delta_pct: f64,
    pub verdict: DealVerdict,
    pub rule_score: u8,
    pub rule_verdict: String,

    #[serde(default)]
    pub llm_score: Option<u8>,

    #[serde(default)]
    pub llm_verdict: Option<String>,

    #[serde(default)]
    pub llm_reasoning: Option<String>,

    /// Final |rule − llm| gap when the score policy gave up retrying.
    #[serde(default)]
    pub unresolved_disagreement: Option<f64>,

    #[serde(default)]
    pub rescore_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResidualAnalysis {
    pub predicted_price: f64,
    pub confidence: f64,
}

/// Placeholder until an external news feed is wired in; always explicit
/// about carrying nothing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsAnalysis {
    pub available: bool,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalValuation {
    pub estimate: f64,
    pub source: String,
}

/// The single mutable record threaded through the whole workflow.
///
/// Created at entry, mutated additively (each node owns exactly one field),
/// read-only once the workflow terminates.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisState {
    pub run_id: Uuid,
    pub input: CarRecord,
    pub started_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,

    pub condition: Option<ConditionReport>,
    pub market: Option<MarketAnalysis>,
    pub residual: Option<ResidualAnalysis>,
    pub news: Option<NewsAnalysis>,
    pub valuation: Option<ExternalValuation>,
    pub early_retrieval: Option<RetrievalBrief>,
    pub consistency: Option<ConsistencyReport>,
    pub late_retrieval: Option<LateRetrieval>,
    pub summary: Option<DealReport>,
    pub refined_narrative: Option<String>,

    pub statuses: BTreeMap<Node, NodeStatus>,
}

impl AnalysisState {
    pub fn new(input: CarRecord) -> Self {
        let statuses = Node::ALL
            .iter()
            .map(|n| (*n, NodeStatus::NotRun))
            .collect();
        Self {
            run_id: Uuid::new_v4(),
            input,
            started_at: Utc::now(),
            finished_at: None,
            condition: None,
            market: None,
            residual: None,
            news: None,
            valuation: None,
            early_retrieval: None,
            consistency: None,
            late_retrieval: None,
            summary: None,
            refined_narrative: None,
            statuses,
        }
    }

    pub fn status(&self, node: Node) -> &NodeStatus {
        // Every node is seeded NotRun in new(), so the map is total.
        self.statuses.get(&node).unwrap_or(&NodeStatus::NotRun)
    }

    pub fn set_status(&mut self, node: Node, status: NodeStatus) {
        self.statuses.insert(node, status);
    }

    /// Resolved-field accessors: a field is only surfaced when its node
    /// status says the data is usable, so a failed signal can never be
    /// mistaken for a computed one.
    pub fn condition_resolved(&self) -> Option<&ConditionReport> {
        self.status(Node::Condition)
            .is_usable()
            .then_some(self.condition.as_ref())
            .flatten()
    }

    pub fn market_resolved(&self) -> Option<&MarketAnalysis> {
        self.status(Node::Market)
            .is_usable()
            .then_some(self.market.as_ref())
            .flatten()
    }

    pub fn residual_resolved(&self) -> Option<&ResidualAnalysis> {
        self.status(Node::Residual)
            .is_usable()
            .then_some(self.residual.as_ref())
            .flatten()
    }

    pub fn valuation_resolved(&self) -> Option<&ExternalValuation> {
        self.status(Node::Valuation)
            .is_usable()
            .then_some(self.valuation.as_ref())
            .flatten()
    }

    pub fn early_retrieval_resolved(&self) -> Option<&RetrievalBrief> {
        self.status(Node::EarlyRetrieval)
            .is_usable()
            .then_some(self.early_retrieval.as_ref())
            .flatten()
    }

    pub fn finalize(&mut self) {
        self.finished_at = Some(Utc::now());
    }
}
