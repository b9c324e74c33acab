use super::{Producer, ProducerReport, Signal};
use crate::collab::ResidualPredictor;
use crate::record::CarRecord;
use crate::state::{Node, ResidualAnalysis};
use async_trait::async_trait;
use std::sync::Arc;

const LOW_CONFIDENCE: f64 = 0.5;

/// Residual fair-value projection via the predictor collaborator.
pub struct ResidualProducer {
    predictor: Option<Arc<dyn ResidualPredictor>>,
    reference_year: i32,
}

impl ResidualProducer {
    pub fn new(predictor: Option<Arc<dyn ResidualPredictor>>, reference_year: i32) -> Self {
        Self {
            predictor,
            reference_year,
        }
    }
}

#[async_trait]
impl Producer for ResidualProducer {
    fn node(&self) -> Node {
        Node::Residual
    }

    async fn produce(&self, input: &CarRecord) -> ProducerReport {
        let Some(predictor) = self.predictor.as_ref() else {
            return ProducerReport::failed(Node::Residual, "predictor not configured");
        };

        match predictor.predict(input, self.reference_year) {
            Ok(prediction) => {
                let analysis = ResidualAnalysis {
                    predicted_price: prediction.value,
                    confidence: prediction.confidence,
                };
                if prediction.confidence < LOW_CONFIDENCE {
                    ProducerReport::degraded(
                        Signal::Residual(analysis),
                        format!("low confidence {:.2}", prediction.confidence),
                    )
                } else {
                    ProducerReport::success(Signal::Residual(analysis))
                }
            }
            Err(e) => ProducerReport::failed(Node::Residual, e.to_string()),
        }
    }
}
