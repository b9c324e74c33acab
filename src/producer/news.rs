use super::{Producer, ProducerReport, Signal};
use crate::record::CarRecord;
use crate::state::{NewsAnalysis, Node, NodeStatus};
use async_trait::async_trait;

/// Placeholder news/policy producer: always reports an explicit
/// "not available" signal until a real feed is wired in.
pub struct NewsProducer;

#[async_trait]
impl Producer for NewsProducer {
    fn node(&self) -> Node {
        Node::News
    }

    async fn produce(&self, _input: &CarRecord) -> ProducerReport {
        ProducerReport {
            node: Node::News,
            signal: Some(Signal::News(NewsAnalysis {
                available: false,
                detail: "news/policy feed not configured".to_string(),
            })),
            status: NodeStatus::failed("news feed not configured"),
        }
    }
}
