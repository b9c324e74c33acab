use super::{Embedder, LateRetrieval, Neighbor, RetrievalBrief, VectorIndex};
use crate::collab::LlmClient;
use crate::record::CarRecord;
use crate::state::{AnalysisState, NodeStatus};
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, warn};

/// Two-stage retrieval over the historical-case index.
///
/// The early stage queries with the input record only and never touches a
/// generative collaborator; the late stage re-queries with Stage-1 signals
/// folded into the query and optionally synthesizes an explanation.
pub struct RetrievalFusion {
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    k: usize,
}

impl RetrievalFusion {
    pub fn new(index: Arc<dyn VectorIndex>, embedder: Arc<dyn Embedder>, k: usize) -> Self {
        Self {
            index,
            embedder,
            k: k.max(1),
        }
    }

    fn neighbors_for(&self, query: &str) -> Vec<Neighbor> {
        let embedding = self.embedder.embed(query);
        self.index
            .query(&embedding, self.k)
            .into_iter()
            .map(|(doc, sim)| Neighbor {
                label: doc.label,
                similarity: sim,
            })
            .collect()
    }

    /// Early stage: input record only, retrieval-only.
    pub fn early(&self, record: &CarRecord) -> RetrievalBrief {
        let query = record.description();
        let neighbors = self.neighbors_for(&query);
        let brief = format_brief(&neighbors);
        debug!(
            "early retrieval: {} neighbors for '{}'",
            neighbors.len(),
            query
        );
        RetrievalBrief { neighbors, brief }
    }

    /// Context snippet for other producers' prompts; queries the shared
    /// read-only index directly so no producer reads another's output.
    pub fn context_for(&self, record: &CarRecord) -> String {
        format_brief(&self.neighbors_for(&record.description()))
    }

    /// Late stage: re-query with Stage-1 signals as enriched context, then
    /// optionally synthesize. An absent LLM degrades, never fails.
    pub async fn late(
        &self,
        state: &AnalysisState,
        llm: Option<&Arc<dyn LlmClient>>,
    ) -> (LateRetrieval, NodeStatus) {
        let query = enriched_query(state);
        let neighbors = self.neighbors_for(&query);

        let Some(llm) = llm else {
            return (
                LateRetrieval {
                    neighbors,
                    query,
                    synthesis: None,
                },
                NodeStatus::degraded("synthesis unavailable"),
            );
        };

        let prompt = synthesis_prompt(state, &neighbors);
        match llm.complete(&prompt).await {
            Ok(text) => {
                let synthesis = text.trim().to_string();
                let status = if synthesis.is_empty() {
                    NodeStatus::degraded("empty synthesis")
                } else {
                    NodeStatus::Success
                };
                (
                    LateRetrieval {
                        neighbors,
                        query,
                        synthesis: Some(synthesis).filter(|s| !s.is_empty()),
                    },
                    status,
                )
            }
            Err(e) => {
                warn!("late retrieval synthesis failed: {}", e);
                (
                    LateRetrieval {
                        neighbors,
                        query,
                        synthesis: None,
                    },
                    NodeStatus::degraded("synthesis unavailable"),
                )
            }
        }
    }
}

/// Union of the input record and the finalized Stage-1 signals.
fn enriched_query(state: &AnalysisState) -> String {
    let mut query = state.input.description();
    if let Some(condition) = state.condition_resolved() {
        let _ = write!(
            query,
            " {:?} mileage {} title",
            condition.mileage_band,
            if condition.clean_title { "clean" } else { "branded" }
        );
    }
    if let Some(market) = state.market_resolved() {
        let _ = write!(
            query,
            " market median ${:.0} verdict {}",
            market.market_median, market.verdict
        );
    }
    if let Some(residual) = state.residual_resolved() {
        let _ = write!(query, " residual ${:.0}", residual.predicted_price);
    }
    query
}

fn format_brief(neighbors: &[Neighbor]) -> String {
    if neighbors.is_empty() {
        return String::new();
    }
    let mut brief = String::from("Similar historical cases:\n");
    for n in neighbors {
        let _ = writeln!(brief, "- {} (sim {:.2})", n.label, n.similarity);
    }
    brief.trim_end().to_string()
}

fn synthesis_prompt(state: &AnalysisState, neighbors: &[Neighbor]) -> String {
    let mut prompt = String::from(
        "You are a used-car pricing analyst. Using only the evidence below, \
         explain in under 120 words whether this purchase looks sound, citing \
         the retrieved cases.\n\n",
    );
    let _ = writeln!(prompt, "Car: {}", state.input.description());
    if let Some(market) = state.market_resolved() {
        let _ = writeln!(
            prompt,
            "Market: median ${:.0}, delta {:+.1}%, verdict {}",
            market.market_median, market.price_delta_pct, market.verdict
        );
    }
    if let Some(residual) = state.residual_resolved() {
        let _ = writeln!(prompt, "Residual estimate: ${:.0}", residual.predicted_price);
    }
    if !neighbors.is_empty() {
        let _ = writeln!(prompt, "\n{}", format_brief(neighbors));
    }
    prompt
}
