use super::{Producer, ProducerReport, Signal};
use crate::record::CarRecord;
use crate::retrieval::RetrievalFusion;
use crate::state::Node;
use async_trait::async_trait;
use std::sync::Arc;

/// Early retrieval: nearest historical cases from the vector index.
/// Retrieval-only by contract; no generative collaborator is reachable
/// from here.
pub struct EarlyRetrievalProducer {
    fusion: Arc<RetrievalFusion>,
}

impl EarlyRetrievalProducer {
    pub fn new(fusion: Arc<RetrievalFusion>) -> Self {
        Self { fusion }
    }
}

#[async_trait]
impl Producer for EarlyRetrievalProducer {
    fn node(&self) -> Node {
        Node::EarlyRetrieval
    }

    async fn produce(&self, input: &CarRecord) -> ProducerReport {
        let brief = self.fusion.early(input);
        ProducerReport::success(Signal::EarlyRetrieval(brief))
    }
}
