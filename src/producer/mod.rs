mod condition;
mod market;
mod news;
mod residual;
mod retrieval;
mod valuation;

pub use condition::ConditionProducer;
pub use market::MarketProducer;
pub use news::NewsProducer;
pub use residual::ResidualProducer;
pub use retrieval::EarlyRetrievalProducer;
pub use valuation::ValuationProducer;

use crate::record::CarRecord;
use crate::retrieval::RetrievalBrief;
use crate::state::{
    ConditionReport, ExternalValuation, MarketAnalysis, NewsAnalysis, Node, NodeStatus,
    ResidualAnalysis,
};
use async_trait::async_trait;

/// A Stage-1 signal, one variant per namespaced Analysis State field.
#[derive(Debug, Clone)]
pub enum Signal {
    Condition(ConditionReport),
    Market(MarketAnalysis),
    Residual(ResidualAnalysis),
    News(NewsAnalysis),
    Valuation(ExternalValuation),
    EarlyRetrieval(RetrievalBrief),
}

impl Signal {
    pub fn node(&self) -> Node {
        match self {
            Signal::Condition(_) => Node::Condition,
            Signal::Market(_) => Node::Market,
            Signal::Residual(_) => Node::Residual,
            Signal::News(_) => Node::News,
            Signal::Valuation(_) => Node::Valuation,
            Signal::EarlyRetrieval(_) => Node::EarlyRetrieval,
        }
    }
}

/// What a producer hands back to the scheduler at the fan-in barrier.
#[derive(Debug)]
pub struct ProducerReport {
    pub node: Node,
    pub signal: Option<Signal>,
    pub status: NodeStatus,
}

impl ProducerReport {
    pub fn success(signal: Signal) -> Self {
        Self {
            node: signal.node(),
            signal: Some(signal),
            status: NodeStatus::Success,
        }
    }

    pub fn degraded(signal: Signal, reason: impl Into<String>) -> Self {
        Self {
            node: signal.node(),
            signal: Some(signal),
            status: NodeStatus::degraded(reason),
        }
    }

    pub fn failed(node: Node, reason: impl Into<String>) -> Self {
        Self {
            node,
            signal: None,
            status: NodeStatus::failed(reason),
        }
    }
}

/// One analysis-signal producer. Producers receive the same read-only
/// input, run independently, and fail independently; the scheduler owns
/// all writes into Analysis State.
#[async_trait]
pub trait Producer: Send + Sync {
    fn node(&self) -> Node;

    async fn produce(&self, input: &CarRecord) -> ProducerReport;
}
