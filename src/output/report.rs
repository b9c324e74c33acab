use crate::collab::LlmClient;
use crate::consistency::Conflict;
use crate::error::OutputError;
use crate::state::{AnalysisState, DealVerdict, Node, NodeStatus};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

/// Terminal aggregate over every Analysis State field. The availability
/// table keeps "signal absent" distinguishable from "signal computed".
#[derive(Debug, Clone, Serialize)]
pub struct DealReport {
    pub car: String,
    pub price_paid: f64,
    pub market_median: Option<f64>,
    pub price_delta: Option<f64>,
    pub price_delta_pct: Option<f64>,
    pub verdict: Option<DealVerdict>,
    pub rule_score: Option<u8>,
    pub llm_score: Option<u8>,
    pub residual_estimate: Option<f64>,
    pub external_estimate: Option<f64>,
    pub conflicts: Vec<Conflict>,
    pub availability: BTreeMap<String, String>,
}

/// Build the baseline structured report from finalized state.
pub fn build_deal_report(state: &AnalysisState) -> DealReport {
    let market = state.market_resolved();
    let availability = state
        .statuses
        .iter()
        .map(|(node, status)| (node.to_string(), status.to_string()))
        .collect();

    DealReport {
        car: format!(
            "{} {} {}",
            state.input.year, state.input.make, state.input.model
        ),
        price_paid: state.input.price_paid,
        market_median: market.map(|m| m.market_median),
        price_delta: market.map(|m| m.price_delta),
        price_delta_pct: market.map(|m| m.price_delta_pct),
        verdict: market.map(|m| m.verdict),
        rule_score: market.map(|m| m.rule_score),
        llm_score: market.and_then(|m| m.llm_score),
        residual_estimate: state.residual_resolved().map(|r| r.predicted_price),
        external_estimate: state.valuation_resolved().map(|v| v.estimate),
        conflicts: state
            .consistency
            .as_ref()
            .map(|c| c.conflicts.clone())
            .unwrap_or_default(),
        availability,
    }
}

fn signed_currency(x: f64) -> String {
    if x < 0.0 {
        format!("-${:.0}", -x)
    } else {
        format!("+${:.0}", x)
    }
}

/// Render the baseline Markdown report.
pub fn render_markdown(state: &AnalysisState) -> String {
    let mut out = String::new();

    let _ = writeln!(
        out,
        "# {} {} {}\n",
        state.input.year, state.input.make, state.input.model
    );

    out.push_str("| Metric | Value |\n");
    out.push_str("|--------|-------|\n");
    let _ = writeln!(out, "| Paid | ${:.0} |", state.input.price_paid);
    let _ = writeln!(out, "| Mileage | {} |", state.input.mileage);
    if let Some(condition) = state.condition_resolved() {
        let _ = writeln!(
            out,
            "| Title | {} |",
            if condition.clean_title { "clean" } else { "branded" }
        );
        let _ = writeln!(out, "| Mileage band | {:?} |", condition.mileage_band);
    }
    out.push('\n');

    out.push_str("## Sources\n\n");
    if let Some(market) = state.market_resolved() {
        let _ = writeln!(
            out,
            "- Market median: ${:.0} over {} comparables (Δ {}, {:+.1}%), verdict: {}",
            market.market_median,
            market.sample_count,
            signed_currency(market.price_delta),
            market.price_delta_pct,
            market.verdict
        );
        match market.llm_score {
            Some(llm) => {
                let _ = writeln!(
                    out,
                    "- Rule score: {}/100, LLM score: {}/100",
                    market.rule_score, llm
                );
            }
            None => {
                let _ = writeln!(
                    out,
                    "- Rule score: {}/100 (LLM score absent)",
                    market.rule_score
                );
            }
        }
        if let Some(gap) = market.unresolved_disagreement {
            let _ = writeln!(
                out,
                "- Unresolved score disagreement: gap {:.0} after {} rescore pass(es)",
                gap, market.rescore_attempts
            );
        }
    } else {
        out.push_str("- Market signal absent\n");
    }
    if let Some(residual) = state.residual_resolved() {
        let _ = writeln!(
            out,
            "- Residual model: ${:.0} (confidence {:.2})",
            residual.predicted_price, residual.confidence
        );
    }
    if let Some(valuation) = state.valuation_resolved() {
        let _ = writeln!(
            out,
            "- External valuation: ${:.0} via {}",
            valuation.estimate, valuation.source
        );
    }
    out.push('\n');

    if let Some(early) = state.early_retrieval_resolved() {
        if !early.brief.is_empty() {
            out.push_str("## Early context\n\n");
            out.push_str(&early.brief);
            out.push_str("\n\n");
        }
    }

    if let Some(late) = &state.late_retrieval {
        if !late.neighbors.is_empty() || late.synthesis.is_some() {
            out.push_str("## Retrieved evidence\n\n");
            for neighbor in &late.neighbors {
                let _ = writeln!(out, "- {} (sim {:.2})", neighbor.label, neighbor.similarity);
            }
            match &late.synthesis {
                Some(synthesis) => {
                    let _ = writeln!(out, "\n{}", synthesis);
                }
                None => out.push_str("\n*Synthesis unavailable*\n"),
            }
            out.push('\n');
        }
    }

    if let Some(consistency) = &state.consistency {
        if !consistency.conflicts.is_empty() {
            out.push_str("## Conflicts\n\n");
            for conflict in &consistency.conflicts {
                let _ = writeln!(
                    out,
                    "- [{}] {}: {} → {}",
                    conflict.severity, conflict.pair, conflict.detail, conflict.action
                );
                if !conflict.annotation.is_empty() {
                    let _ = writeln!(out, "  - note: {}", conflict.annotation);
                }
            }
            out.push('\n');
        }
    }

    out.push_str("## Signal availability\n\n");
    for (node, status) in &state.statuses {
        let _ = writeln!(out, "- {}: {}", node, status);
    }
    out.push('\n');

    out.push_str("## Synthesis\n\n");
    match state.market_resolved() {
        Some(market) if market.price_delta_pct.abs() >= 15.0 => {
            let direction = if market.price_delta_pct > 0.0 {
                "overpriced"
            } else {
                "undervalued"
            };
            let _ = writeln!(
                out,
                "Overall the deal looks {} by {:+.1}% against the market median.",
                direction, market.price_delta_pct
            );
        }
        Some(_) => {
            out.push_str("Overall the deal sits close to the market median.\n");
        }
        None => {
            out.push_str(
                "No market median could be computed; the remaining signals are inconclusive.\n",
            );
        }
    }

    out
}

/// Optional stylistic refinement of the baseline. Failure of the
/// collaborator leaves the baseline as the final output.
pub async fn refine_narrative(llm: &Arc<dyn LlmClient>, baseline_md: &str) -> Option<String> {
    let prompt = format!(
        "Act as a senior automotive pricing editor. Rewrite the following \
         report as concise Markdown with sections Inputs, Sources, Conflicts, \
         Recommendation. Do not invent numbers.\n\nBaseline:\n{}",
        baseline_md
    );
    match llm.complete(&prompt).await {
        Ok(text) => {
            let text = text.trim().to_string();
            (!text.is_empty()).then_some(text)
        }
        Err(e) => {
            warn!("narrative refinement failed: {}", e);
            None
        }
    }
}

/// Write one car's Markdown and/or JSON report into the report directory.
pub fn write_car_reports(
    report_dir: &Path,
    state: &AnalysisState,
    markdown: bool,
    json: bool,
) -> Result<(), OutputError> {
    fs::create_dir_all(report_dir).map_err(OutputError::CreateDir)?;

    if markdown {
        let mut content = match &state.refined_narrative {
            Some(refined) => refined.clone(),
            None => render_markdown(state),
        };
        if !content.ends_with('\n') {
            content.push('\n');
        }
        let path = report_dir.join(format!("{}.md", state.input.id));
        fs::write(path, content).map_err(OutputError::WriteReport)?;
    }

    if json {
        let path = report_dir.join(format!("{}.json", state.input.id));
        let payload = serde_json::to_string_pretty(state)?;
        fs::write(path, payload).map_err(OutputError::WriteReport)?;
    }

    Ok(())
}

/// Exit code for a finished batch: 0 whenever every workflow reached
/// Summary, regardless of degradation along the way.
pub fn exit_code(states: &[AnalysisState]) -> i32 {
    let all_summarized = states
        .iter()
        .all(|s| *s.status(Node::Summary) == NodeStatus::Success);
    if all_summarized {
        0
    } else {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::CarRecord;
    use crate::state::{MarketAnalysis, ResidualAnalysis};

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

    fn market() -> MarketAnalysis {
        MarketAnalysis {
            sample_count: 11,
            price_low: 15_000.0,
            price_high: 19_700.0,
            market_median: 17_368.0,
            price_delta: 5_132.0,
            price_delta_pct: 29.548_595,
            verdict: DealVerdict::Unfavorable,
            rule_score: 45,
            rule_verdict: "Poor".to_string(),
            llm_score: Some(30),
            llm_verdict: Some("Poor".to_string()),
            llm_reasoning: None,
            unresolved_disagreement: None,
            rescore_attempts: 0,
        }
    }

    #[test]
    fn test_report_distinguishes_absent_from_computed() {
        let mut state = AnalysisState::new(record());
        state.market = Some(market());
        state.set_status(Node::Market, NodeStatus::Success);
        // Residual present but failed: must not surface as a number
        state.residual = Some(ResidualAnalysis {
            predicted_price: 1.0,
            confidence: 1.0,
        });
        state.set_status(Node::Residual, NodeStatus::failed("predictor crashed"));

        let report = build_deal_report(&state);
        assert_eq!(report.market_median, Some(17_368.0));
        assert!(report.residual_estimate.is_none());
        assert_eq!(
            report.availability.get("residual").unwrap(),
            "failed: predictor crashed"
        );

        let markdown = render_markdown(&state);
        assert!(markdown.contains("residual: failed"));
        assert!(!markdown.contains("Residual model"));
    }

    #[test]
    fn test_markdown_contains_delta_and_verdict() {
        let mut state = AnalysisState::new(record());
        state.market = Some(market());
        state.set_status(Node::Market, NodeStatus::Success);

        let markdown = render_markdown(&state);
        assert!(markdown.contains("+$5132"));
        assert!(markdown.contains("+29.5%"));
        assert!(markdown.contains("unfavorable"));
        assert!(markdown.contains("overpriced"));
    }

    #[test]
    fn test_markdown_without_market_is_explicit() {
        let state = AnalysisState::new(record());
        let markdown = render_markdown(&state);
        assert!(markdown.contains("Market signal absent"));
        assert!(markdown.contains("No market median could be computed"));
    }

    #[test]
    fn test_write_reports_md_and_json() {
        let mut state = AnalysisState::new(record());
        state.market = Some(market());
        state.set_status(Node::Market, NodeStatus::Success);
        state.summary = Some(build_deal_report(&state));

        let dir = tempfile::tempdir().unwrap();
        write_car_reports(dir.path(), &state, true, true).unwrap();
        assert!(dir.path().join("camry-20.md").exists());
        assert!(dir.path().join("camry-20.json").exists());

        let json = fs::read_to_string(dir.path().join("camry-20.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["input"]["make"], "Toyota");
        assert_eq!(value["summary"]["market_median"], 17_368.0);
    }

    #[test]
    fn test_exit_code_zero_despite_degradation() {
        let mut state = AnalysisState::new(record());
        state.set_status(Node::Market, NodeStatus::failed("search down"));
        state.set_status(Node::Summary, NodeStatus::Success);
        assert_eq!(exit_code(&[state]), 0);
    }
}
