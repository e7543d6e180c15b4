//! Crime Ingest - batch ETL for street-level crime reports

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use crime_common::logging::init_logging;
use crime_ingest::bootstrap::{build_orchestrator, report_settings};
use crime_ingest::config::{AppConfig, DEFAULT_CONFIG_PATH};
use crime_ingest::source::{SourceClient, TargetStrategy};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "crime-ingest")]
#[command(author, version, about = "Crime report ETL tool")]
struct Cli {
    /// Report configuration file
    #[arg(short, long, env = "CRIME_ETL_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the report once
    Run,

    /// Report whether the configured month still needs extraction
    Check,

    /// Print the request targets that would be used
    Targets {
        /// One target per coordinate instead of a single polygon
        #[arg(long)]
        per_point: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;

    let _guard = init_logging(&config.log_config(cli.verbose)?)?;

    match cli.command {
        Command::Run => {
            let orchestrator = build_orchestrator(&config)?;
            let outcome = orchestrator.run_report().await?;
            if outcome.extracted() {
                println!(
                    "Extracted {} rows for {} into {}",
                    outcome.rows_transformed,
                    config.source.date,
                    outcome.object_key.as_deref().unwrap_or("-")
                );
            } else {
                println!(
                    "{} already processed; warehouse table {} refreshed",
                    config.source.date, config.warehouse.table_name
                );
            }
        },
        Command::Check => {
            let orchestrator = build_orchestrator(&config)?;
            let fresh = orchestrator.check_freshness().await?;
            println!(
                "{}: {}",
                config.source.date,
                if fresh { "needs extraction" } else { "already processed" }
            );
        },
        Command::Targets { per_point } => {
            let settings = report_settings(&config)?;
            let source = SourceClient::new(config.source_settings())?;
            let strategy = if per_point {
                TargetStrategy::PerPoint
            } else {
                TargetStrategy::Polygon
            };
            for target in source.build_targets(strategy, &settings.coordinates, Some(&settings.date_filter))? {
                println!("{}", target);
            }
        },
    }

    info!("Done");
    Ok(())
}
