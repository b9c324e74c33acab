use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

mod cli;
mod collab;
mod config;
mod consistency;
mod error;
mod output;
mod producer;
mod record;
mod retrieval;
mod state;
mod workflow;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing - only show logs with --verbose
    let filter = if cli.verbose {
        EnvFilter::new("dealgauge=debug")
    } else {
        EnvFilter::new("dealgauge=warn")
    };

    fmt().with_env_filter(filter).with_target(false).init();

    match cli.command {
        Commands::Run(args) => cli::run::execute(args).await,
        Commands::Seed(args) => cli::seed::execute(args),
        Commands::Schema => cli::schema::execute(),
    }
}
