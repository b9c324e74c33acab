use crate::collab::LlmClient;
use crate::consistency::ConsistencyEngine;
use crate::error::WorkflowError;
use crate::output::{build_deal_report, refine_narrative, render_markdown};
use crate::producer::{Producer, ProducerReport, Signal};
use crate::record::CarRecord;
use crate::retrieval::RetrievalFusion;
use crate::state::{AnalysisState, Node, NodeStatus};
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::timeout as tokio_timeout;
use tracing::{debug, info, warn};

/// The directed workflow over one Analysis State:
/// Condition → {Market, Residual, News, Valuation, EarlyRetrieval} →
/// Consistency → LateRetrieval → Summary.
///
/// Stage-1 producers run as independent tasks against the same immutable
/// input; the barrier waits for every dispatched producer to resolve or
/// time out, and this scheduler is the only writer into the state.
pub struct Workflow {
    condition: Arc<dyn Producer>,
    fanout: Vec<Arc<dyn Producer>>,
    engine: ConsistencyEngine,
    fusion: Arc<RetrievalFusion>,
    llm: Option<Arc<dyn LlmClient>>,
    producer_timeout: Duration,
    semaphore: Arc<Semaphore>,
}

impl Workflow {
    pub fn new(
        condition: Arc<dyn Producer>,
        fanout: Vec<Arc<dyn Producer>>,
        engine: ConsistencyEngine,
        fusion: Arc<RetrievalFusion>,
        llm: Option<Arc<dyn LlmClient>>,
        producer_timeout: Duration,
        concurrency: usize,
    ) -> Self {
        Self {
            condition,
            fanout,
            engine,
            fusion,
            llm,
            producer_timeout,
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    /// Run the whole workflow for one car. Producer failures and absent
    /// collaborators degrade the result; only a broken runtime surfaces
    /// as an error.
    pub async fn evaluate(&self, record: CarRecord) -> Result<AnalysisState, WorkflowError> {
        let mut state = AnalysisState::new(record);
        info!(
            "evaluating {} ({} {} {})",
            state.input.id, state.input.year, state.input.make, state.input.model
        );

        // Condition first: cheap, pure, and its flags are part of the
        // record every later stage describes.
        let report = self.condition.produce(&state.input).await;
        merge_report(&mut state, report);

        self.fan_out(&mut state).await?;

        // Stage 2: pairwise cross-checks over whatever resolved.
        let mut consistency = self.engine.evaluate(&state);
        self.engine
            .annotate(&mut consistency, &state, self.llm.as_ref())
            .await;
        debug!("{} conflicts detected", consistency.conflicts.len());
        state.consistency = Some(consistency);
        state.set_status(Node::Consistency, NodeStatus::Success);

        // Stage 2b: enriched re-query plus optional synthesis.
        let (late, status) = self.fusion.late(&state, self.llm.as_ref()).await;
        state.late_retrieval = Some(late);
        state.set_status(Node::LateRetrieval, status);

        // Stage 3: terminal aggregation; refinement is additive only.
        let summary = build_deal_report(&state);
        state.summary = Some(summary);
        if let Some(llm) = self.llm.as_ref() {
            state.refined_narrative = refine_narrative(llm, &render_markdown(&state)).await;
        }
        state.set_status(Node::Summary, NodeStatus::Success);

        state.finalize();
        Ok(state)
    }

    /// Dispatch the Stage-1 producers concurrently and block at the
    /// barrier until all of them resolved or timed out.
    async fn fan_out(&self, state: &mut AnalysisState) -> Result<(), WorkflowError> {
        let mut futures = FuturesUnordered::new();

        for producer in &self.fanout {
            let permit = self
                .semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| WorkflowError::Fatal("scheduler semaphore closed".to_string()))?;
            let producer = producer.clone();
            let input = state.input.clone();
            let timeout = self.producer_timeout;
            let node = producer.node();

            let handle = tokio::spawn(async move {
                let _permit = permit; // hold until done
                match tokio_timeout(timeout, producer.produce(&input)).await {
                    Ok(report) => report,
                    // The late result of a timed-out producer is dropped
                    // with the task; it is never retro-fitted.
                    Err(_) => ProducerReport::failed(node, "timeout"),
                }
            });

            futures.push(async move {
                match handle.await {
                    Ok(report) => report,
                    Err(e) => ProducerReport::failed(node, format!("task panicked: {}", e)),
                }
            });
        }

        while let Some(report) = futures.next().await {
            merge_report(state, report);
        }
        Ok(())
    }
}

/// Single-writer merge at the barrier. Each producer owns exactly one
/// namespaced field; a second signal for an already-resolved node is
/// rejected, not overwritten.
fn merge_report(state: &mut AnalysisState, report: ProducerReport) {
    if *state.status(report.node) != NodeStatus::NotRun {
        warn!(
            "ignoring duplicate result for resolved node {} ({})",
            report.node, report.status
        );
        return;
    }

    debug!("node {} resolved: {}", report.node, report.status);
    if let Some(signal) = report.signal {
        match signal {
            Signal::Condition(condition) => state.condition = Some(condition),
            Signal::Market(market) => state.market = Some(market),
            Signal::Residual(residual) => state.residual = Some(residual),
            Signal::News(news) => state.news = Some(news),
            Signal::Valuation(valuation) => state.valuation = Some(valuation),
            Signal::EarlyRetrieval(brief) => state.early_retrieval = Some(brief),
        }
    }
    state.set_status(report.node, report.status);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::{LlmClient, SearchClient, SearchHit};
    use crate::config::RetryConfig;
    use crate::consistency::ConsistencyThresholds;
    use crate::error::CollabError;
    use crate::producer::{
        ConditionProducer, EarlyRetrievalProducer, MarketProducer, NewsProducer,
        ResidualProducer, ValuationProducer,
    };
    use crate::retrieval::{Embedder, HashedEmbedder, IndexDoc, MemoryIndex, VectorIndex};
    use crate::state::DealVerdict;
    use crate::workflow::ScorePolicy;
    use async_trait::async_trait;

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

    /// Eleven distinct comparables whose median is 17368; enough samples
    /// for the data-quality bonus.
    const COMPARABLES: [f64; 11] = [
        15_000.0, 15_500.0, 16_000.0, 16_500.0, 17_000.0, 17_368.0, 17_800.0, 18_200.0,
        18_700.0, 19_200.0, 19_700.0,
    ];

    struct FixedSearch;

    #[async_trait]
    impl SearchClient for FixedSearch {
        async fn search(&self, query: &str) -> Result<Vec<SearchHit>, CollabError> {
            // Answer one of the four queries so each pass sees one corpus
            if !query.starts_with("used") {
                return Err(CollabError::NoResults(query.to_string()));
            }
            Ok(COMPARABLES
                .iter()
                .map(|p| SearchHit {
                    title: "2020 Toyota Camry for sale".to_string(),
                    url: "https://example.com".to_string(),
                    content: format!("asking ${:.0}", p),
                })
                .collect())
        }
    }

    struct FixedLlm;

    #[async_trait]
    impl LlmClient for FixedLlm {
        async fn complete(&self, prompt: &str) -> Result<String, CollabError> {
            if prompt.contains("market analyst") {
                Ok(r#"{"score": 30, "verdict": "Poor", "reasoning": "over market"}"#.to_string())
            } else {
                // Annotation / synthesis / refinement prompts
                Ok("Comparables look sound; the premium is unexplained.".to_string())
            }
        }
    }

    fn fusion() -> Arc<RetrievalFusion> {
        let embedder = Arc::new(HashedEmbedder::default());
        let mut index = MemoryIndex::new();
        let text = "2019 Toyota Camry 42000 miles paid $19500";
        index.upsert(
            IndexDoc {
                id: "hist-1".to_string(),
                text: text.to_string(),
                label: text.to_string(),
            },
            embedder.embed(text),
        );
        Arc::new(RetrievalFusion::new(Arc::new(index), embedder, 3))
    }

    fn workflow(
        search: Option<Arc<dyn SearchClient>>,
        llm: Option<Arc<dyn LlmClient>>,
    ) -> Workflow {
        let fusion = fusion();
        let retry = RetryConfig {
            max_attempts: 1,
            backoff_base_ms: 1,
        };
        let fanout: Vec<Arc<dyn Producer>> = vec![
            Arc::new(MarketProducer::new(
                search,
                llm.clone(),
                fusion.clone(),
                retry.clone(),
                ScorePolicy::default(),
                2025,
            )),
            Arc::new(ResidualProducer::new(None, 2025)),
            Arc::new(NewsProducer),
            Arc::new(ValuationProducer::new(None, retry)),
            Arc::new(EarlyRetrievalProducer::new(fusion.clone())),
        ];
        Workflow::new(
            Arc::new(ConditionProducer::new(2025)),
            fanout,
            ConsistencyEngine::new(ConsistencyThresholds::default()),
            fusion,
            llm,
            Duration::from_secs(5),
            4,
        )
    }

    #[tokio::test]
    async fn test_workflow_completes_with_everything_unavailable() {
        // No search, no LLM, no predictor, no valuation, no news feed:
        // the workflow still reaches Summary.
        let state = workflow(None, None).evaluate(record()).await.unwrap();

        assert_eq!(*state.status(Node::Summary), NodeStatus::Success);
        assert_eq!(*state.status(Node::Consistency), NodeStatus::Success);
        assert!(matches!(
            state.status(Node::Market),
            NodeStatus::Failed { .. }
        ));
        assert!(matches!(
            state.status(Node::Valuation),
            NodeStatus::Failed { .. }
        ));
        assert!(state.summary.is_some());
        assert!(state.refined_narrative.is_none());
        assert!(state
            .consistency
            .as_ref()
            .unwrap()
            .conflicts
            .is_empty());
        assert_eq!(
            *state.status(Node::LateRetrieval),
            NodeStatus::degraded("synthesis unavailable")
        );
        assert!(state.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_acceptance_scenario_end_to_end() {
        // Median 17368 against 22500 paid: delta +5132 (+29.55%), rule
        // score 45 vs LLM 30 leaves no score conflict, verdict lands on
        // "unfavorable".
        let state = workflow(Some(Arc::new(FixedSearch)), Some(Arc::new(FixedLlm)))
            .evaluate(record())
            .await
            .unwrap();

        let market = state.market_resolved().expect("market resolved");
        assert_eq!(market.market_median, 17_368.0);
        assert_eq!(market.price_delta, 5_132.0);
        assert!((market.price_delta_pct - 29.55).abs() < 0.01);
        assert_eq!(market.rule_score, 45);
        assert_eq!(market.llm_score, Some(30));
        assert_eq!(market.verdict, DealVerdict::Unfavorable);
        assert_eq!(*state.status(Node::Market), NodeStatus::Success);

        let conflicts = &state.consistency.as_ref().unwrap().conflicts;
        assert!(conflicts.iter().all(|c| c.pair != "rule_score/llm_score"));

        let summary = state.summary.as_ref().unwrap();
        assert_eq!(summary.market_median, Some(17_368.0));
        assert_eq!(summary.price_delta, Some(5_132.0));
        assert_eq!(summary.verdict, Some(DealVerdict::Unfavorable));

        let markdown = render_markdown(&state);
        assert!(markdown.contains("+$5132"));
        assert!(markdown.contains("+29.5%"));

        assert!(state.refined_narrative.is_some());
        assert!(state
            .late_retrieval
            .as_ref()
            .unwrap()
            .synthesis
            .is_some());
    }

    struct SlowProducer;

    #[async_trait]
    impl Producer for SlowProducer {
        fn node(&self) -> Node {
            Node::Residual
        }

        async fn produce(&self, _input: &CarRecord) -> ProducerReport {
            tokio::time::sleep(Duration::from_secs(30)).await;
            ProducerReport::failed(Node::Residual, "should never get here")
        }
    }

    #[tokio::test]
    async fn test_timed_out_producer_never_blocks_siblings() {
        let fusion = fusion();
        let fanout: Vec<Arc<dyn Producer>> = vec![
            Arc::new(SlowProducer),
            Arc::new(NewsProducer),
            Arc::new(EarlyRetrievalProducer::new(fusion.clone())),
        ];
        let workflow = Workflow::new(
            Arc::new(ConditionProducer::new(2025)),
            fanout,
            ConsistencyEngine::new(ConsistencyThresholds::default()),
            fusion,
            None,
            Duration::from_millis(50),
            4,
        );

        let state = workflow.evaluate(record()).await.unwrap();
        assert_eq!(
            *state.status(Node::Residual),
            NodeStatus::failed("timeout")
        );
        assert_eq!(*state.status(Node::EarlyRetrieval), NodeStatus::Success);
        assert_eq!(*state.status(Node::Summary), NodeStatus::Success);
    }

    #[tokio::test]
    async fn test_merge_rejects_duplicate_node_result() {
        let mut state = AnalysisState::new(record());
        merge_report(
            &mut state,
            ProducerReport::failed(Node::Residual, "first failure"),
        );
        merge_report(
            &mut state,
            ProducerReport::success(Signal::Residual(crate::state::ResidualAnalysis {
                predicted_price: 1.0,
                confidence: 1.0,
            })),
        );

        // First write wins; the late result is discarded
        assert_eq!(
            *state.status(Node::Residual),
            NodeStatus::failed("first failure")
        );
        assert!(state.residual.is_none());
    }
}
