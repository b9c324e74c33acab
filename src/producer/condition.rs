use super::{Producer, ProducerReport, Signal};
use crate::record::CarRecord;
use crate::state::{ConditionReport, MileageBand, Node};
use async_trait::async_trait;

/// Condition assessment from the raw record metadata. Pure; runs before
/// the fan-out.
pub struct ConditionProducer {
    reference_year: i32,
}

impl ConditionProducer {
    pub fn new(reference_year: i32) -> Self {
        Self { reference_year }
    }
}

#[async_trait]
impl Producer for ConditionProducer {
    fn node(&self) -> Node {
        Node::Condition
    }

    async fn produce(&self, input: &CarRecord) -> ProducerReport {
        let age = self.reference_year - input.year;
        let report = ConditionReport {
            summary: format!("{} {} {}", input.year, input.make, input.model),
            mileage_band: MileageBand::for_car(input.mileage, age),
            accident_history: input
                .accident_history
                .clone()
                .unwrap_or_else(|| "Unknown".to_string()),
            clean_title: input.clean_title,
        };
        ProducerReport::success(Signal::Condition(report))
    }
}
