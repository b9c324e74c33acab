use crate::cli::{OutputFormat, RunArgs, DEFAULT_CONFIG};
use crate::collab::{
    ArtifactModel, CliLlm, HttpSearch, HttpValuation, LlmClient, ResidualPredictor, SearchClient,
    ValuationClient,
};
use crate::config::Config;
use crate::consistency::ConsistencyEngine;
use crate::output::{exit_code, write_car_reports, write_run_summary};
use crate::producer::{
    ConditionProducer, EarlyRetrievalProducer, MarketProducer, NewsProducer, Producer,
    ResidualProducer, ValuationProducer,
};
use crate::record::CaseStore;
use crate::retrieval::{HashedEmbedder, MemoryIndex, RetrievalFusion, VectorIndex};
use crate::workflow::Workflow;
use chrono::{Datelike, Local};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub async fn execute(args: RunArgs) -> anyhow::Result<()> {
    let explicit = args.config.is_some();
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));
    let mut config = Config::load_or_default(&config_path, explicit)?;

    if let Some(concurrency) = args.concurrency {
        config.concurrency = concurrency;
    }
    if let Some(report_dir) = args.report_dir.clone() {
        config.report_dir = report_dir;
    }
    if let Some(cases) = args.cases.clone() {
        config.cases_file = cases;
    }
    config.validate()?;

    if args.ids.is_empty() && !args.all {
        anyhow::bail!("select records by id, or pass --all for a batch run");
    }

    // Inability to load any input record is the one fatal path.
    let store = CaseStore::load(&config.cases_file)?;
    let records = store.select(&args.ids, args.limit, args.offset)?;
    info!(
        "loaded {} record(s) from {:?}",
        records.len(),
        config.cases_file
    );

    let reference_year = config.reference_year.unwrap_or_else(|| Local::now().year());

    // Collaborators; each may be absent, which degrades rather than aborts.
    let search: Option<Arc<dyn SearchClient>> = HttpSearch::from_config(&config.search)
        .map(|c| Arc::new(c) as Arc<dyn SearchClient>);
    let llm: Option<Arc<dyn LlmClient>> =
        CliLlm::from_config(&config.llm).map(|c| Arc::new(c) as Arc<dyn LlmClient>);
    let predictor: Option<Arc<dyn ResidualPredictor>> = ArtifactModel::load(&config.model_artifact)?
        .map(|m| Arc::new(m) as Arc<dyn ResidualPredictor>);
    let valuation: Option<Arc<dyn ValuationClient>> = HttpValuation::from_config(&config.valuation)
        .map(|c| Arc::new(c) as Arc<dyn ValuationClient>);

    info!(
        "collaborators: search={}, llm={}, predictor={}, valuation={}",
        search.is_some(),
        llm.is_some(),
        predictor.is_some(),
        valuation.is_some()
    );

    let embedder = Arc::new(HashedEmbedder::new(config.embedding_dimension));
    let index = Arc::new(MemoryIndex::load(&config.index_file)?);
    if index.is_empty() {
        info!("retrieval index is empty; run `dealgauge seed` to build it");
    }
    let fusion = Arc::new(RetrievalFusion::new(index, embedder, config.retrieval_k));

    let fanout: Vec<Arc<dyn Producer>> = vec![
        Arc::new(MarketProducer::new(
            search,
            llm.clone(),
            fusion.clone(),
            config.retry.clone(),
            config.policy(),
            reference_year,
        )),
        Arc::new(ResidualProducer::new(predictor, reference_year)),
        Arc::new(NewsProducer),
        Arc::new(ValuationProducer::new(valuation, config.retry.clone())),
        Arc::new(EarlyRetrievalProducer::new(fusion.clone())),
    ];

    let workflow = Workflow::new(
        Arc::new(ConditionProducer::new(reference_year)),
        fanout,
        ConsistencyEngine::new(config.thresholds()),
        fusion,
        llm,
        Duration::from_secs(config.producer_timeout_sec),
        config.concurrency,
    );

    // Dated report directory (reports/YYYY-MM-DD/)
    let date_str = Local::now().format("%Y-%m-%d").to_string();
    let report_dir = config.report_dir.join(&date_str);
    info!("reports will be written to {:?}", report_dir);

    let (markdown, json) = match args.format {
        OutputFormat::Md => (true, false),
        OutputFormat::Json => (false, true),
        OutputFormat::Both => (true, true),
    };

    let start = std::time::Instant::now();
    let mut states = Vec::new();

    for record in records {
        let id = record.id.clone();
        let state = workflow.evaluate(record).await?;

        match state.market_resolved() {
            Some(market) => info!(
                "{}: {} ({:+.1}% vs median ${:.0}), {} conflict(s)",
                id,
                market.verdict,
                market.price_delta_pct,
                market.market_median,
                state
                    .consistency
                    .as_ref()
                    .map(|c| c.conflicts.len())
                    .unwrap_or(0)
            ),
            None => info!("{}: market signal absent", id),
        }

        // Streaming mode: each report lands as its evaluation finishes
        if let Err(e) = write_car_reports(&report_dir, &state, markdown, json) {
            warn!("failed to write report for {}: {}", id, e);
        }
        states.push(state);
    }

    write_run_summary(&report_dir, &states, start.elapsed())?;
    info!(
        "completed {} car(s) in {:.1}s",
        states.len(),
        start.elapsed().as_secs_f64()
    );

    let code = exit_code(&states);
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
