//! Upload statistics pipelines

use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use fleetlog::uploads;
use fleetlog_cli::{init_tracing, CommonArgs, Session};
use tracing::error;

#[derive(Debug, Parser)]
#[command(name = "fleetlog-uploads", about = "Upload statistics pipelines")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Index new upload tarballs into the stats store
    Index,
    /// Summarize upload sizes and interarrival times
    Summarize,
    /// Write per-node creation and arrival times, one CSV per node
    Times,
    /// Dump the stats store to CSV
    Csv,
}

async fn run(cli: Cli) -> Result<()> {
    let session = Session::open(&cli.common)?;
    let manager = &session.manager;
    let sinks = &session.sinks;
    let pipeline = match cli.command {
        Command::Index => uploads::index_pipeline(manager, &session.tarballs_path()?, session.metrics())?,
        Command::Summarize => uploads::summarize_pipeline(manager, sinks)?,
        Command::Times => uploads::times_csv_pipeline(manager, sinks)?,
        Command::Csv => uploads::csv_pipeline(manager, sinks)?,
    };
    session.run(pipeline).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli.common);
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("uploads pipeline failed: {err:#}");
            ExitCode::FAILURE
        }
    }
}
