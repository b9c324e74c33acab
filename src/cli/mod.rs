pub mod run;
pub mod schema;
pub mod seed;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "dealgauge")]
#[command(
    author,
    version,
    about = "Cross-checked used-car deal evaluation from concurrent signal producers"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose/debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Evaluate one or more cars and produce reports
    Run(RunArgs),

    /// Build the retrieval index from the case store
    Seed(SeedArgs),

    /// Print JSON Schema for config validation
    Schema,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Md,
    Json,
    Both,
}

#[derive(Parser, Clone)]
pub struct RunArgs {
    /// Record ids from the case store; omit and pass --all for a batch
    #[arg(value_name = "ID")]
    pub ids: Vec<String>,

    /// Evaluate the whole case store (honors --limit/--offset)
    #[arg(long)]
    pub all: bool,

    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Override the case store path
    #[arg(long)]
    pub cases: Option<PathBuf>,

    /// Override the report output directory
    #[arg(long)]
    pub report_dir: Option<PathBuf>,

    /// Max records in a batch run
    #[arg(long)]
    pub limit: Option<usize>,

    /// Records to skip in a batch run
    #[arg(long, default_value_t = 0)]
    pub offset: usize,

    /// Report format
    #[arg(long, value_enum, default_value = "both")]
    pub format: OutputFormat,

    /// Override max concurrent producers
    #[arg(long)]
    pub concurrency: Option<usize>,
}

#[derive(Parser, Clone)]
pub struct SeedArgs {
    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Override the case store path
    #[arg(long)]
    pub cases: Option<PathBuf>,
}

pub const DEFAULT_CONFIG: &str = "dealgauge.yaml";
