use crate::error::OutputError;
use crate::state::{AnalysisState, NodeStatus};
use chrono::Utc;
use serde::Serialize;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub timestamp: String,
    pub duration_sec: f64,
    pub cars: Vec<CarSummary>,
    pub conflict_total: usize,
    pub report_dir: PathBuf,
}

#[derive(Debug, Serialize)]
pub struct CarSummary {
    pub id: String,
    pub car: String,
    pub verdict: Option<String>,
    pub price_delta_pct: Option<f64>,
    pub conflicts: usize,
    pub degraded: Vec<String>,
    pub failed: Vec<String>,
}

fn build_summary(states: &[AnalysisState], report_dir: PathBuf, duration: Duration) -> RunSummary {
    let mut cars = Vec::new();
    let mut conflict_total = 0;

    for state in states {
        let market = state.market_resolved();
        let conflicts = state
            .consistency
            .as_ref()
            .map(|c| c.conflicts.len())
            .unwrap_or(0);
        conflict_total += conflicts;

        let mut degraded = Vec::new();
        let mut failed = Vec::new();
        for (node, status) in &state.statuses {
            match status {
                NodeStatus::Degraded { .. } => degraded.push(node.to_string()),
                NodeStatus::Failed { .. } => failed.push(node.to_string()),
                _ => {}
            }
        }

        cars.push(CarSummary {
            id: state.input.id.clone(),
            car: format!(
                "{} {} {}",
                state.input.year, state.input.make, state.input.model
            ),
            verdict: market.map(|m| m.verdict.to_string()),
            price_delta_pct: market.map(|m| m.price_delta_pct),
            conflicts,
            degraded,
            failed,
        });
    }

    RunSummary {
        timestamp: Utc::now().to_rfc3339(),
        duration_sec: duration.as_secs_f64(),
        cars,
        conflict_total,
        report_dir,
    }
}

fn build_summary_markdown(summary: &RunSummary) -> String {
    let mut out = String::from("# Evaluation summary\n\n");
    let _ = writeln!(
        out,
        "{} car(s) in {:.1}s, {} conflict(s) total\n",
        summary.cars.len(),
        summary.duration_sec,
        summary.conflict_total
    );

    out.push_str("| Car | Verdict | Δ% | Conflicts | Degraded | Failed |\n");
    out.push_str("|-----|---------|----|-----------|----------|--------|\n");
    for car in &summary.cars {
        let _ = writeln!(
            out,
            "| {} | {} | {} | {} | {} | {} |",
            car.car,
            car.verdict.as_deref().unwrap_or("—"),
            car.price_delta_pct
                .map(|d| format!("{:+.1}", d))
                .unwrap_or_else(|| "—".to_string()),
            car.conflicts,
            car.degraded.join(", "),
            car.failed.join(", "),
        );
    }
    out
}

/// Write the batch summary as JSON and Markdown next to the car reports.
pub fn write_run_summary(
    report_dir: &Path,
    states: &[AnalysisState],
    duration: Duration,
) -> Result<RunSummary, OutputError> {
    fs::create_dir_all(report_dir).map_err(OutputError::CreateDir)?;

    let summary = build_summary(states, report_dir.to_path_buf(), duration);

    let json = serde_json::to_string_pretty(&summary)?;
    fs::write(report_dir.join("summary.json"), json).map_err(OutputError::WriteReport)?;

    let markdown = build_summary_markdown(&summary);
    fs::write(report_dir.join("summary.md"), markdown).map_err(OutputError::WriteReport)?;

    Ok(summary)
}
