//! Experiments-manager pipelines

use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use fleetlog::experiments;
use fleetlog_cli::{init_tracing, CommonArgs, Session};
use tracing::error;

#[derive(Debug, Parser)]
#[command(name = "fleetlog-experiments", about = "Experiments-manager log pipelines")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Index new experiments-manager tarballs into the logs store
    Index,
    /// Find logs reporting overlapping managed and unmanaged repositories
    Disjoint,
}

async fn run(cli: Cli) -> Result<()> {
    let session = Session::open(&cli.common)?;
    let pipeline = match cli.command {
        Command::Index => {
            experiments::index_pipeline(&session.manager, &session.tarballs_path()?, session.metrics())?
        }
        Command::Disjoint => experiments::disjoint_packages_pipeline(&session.manager, &session.sinks)?,
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
            error!("experiments pipeline failed: {err:#}");
            ExitCode::FAILURE
        }
    }
}
