//! CLI for logmeter
//!
//! - run: ingest access logs of the configured hosts and upload hourly usage
//! - inspect: summarize a local access log without touching any state
//! - state: show the stored resume markers

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;
mod output;

#[derive(Parser)]
#[command(name = "logmeter")]
#[command(about = "logmeter - nginx traffic metering", long_about = None)]
#[command(version)]
struct Cli {
    /// Settings file (TOML or JSON)
    #[arg(short, long, global = true, env = "LOGMETER_CONFIG")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read new log lines from every host and upload hourly usage
    Run(commands::run::RunArgs),

    /// Parse a local access log and print per-domain totals
    Inspect(commands::inspect::InspectArgs),

    /// Print stored resume markers
    State(commands::state::StateArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.json_logs);

    match cli.command {
        Commands::Run(args) => commands::run::run(args, cli.config.as_deref()).await,
        Commands::Inspect(args) => commands::inspect::run(args).await,
        Commands::State(args) => commands::state::run(args, cli.config.as_deref()).await,
    }
}

fn init_tracing(verbose: bool, json: bool) {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(false))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .init();
    }
}
