mod report;
mod summary;

pub use report::{
    build_deal_report, exit_code, refine_narrative, render_markdown, write_car_reports, DealReport,
};
pub use summary::{write_run_summary, RunSummary};
