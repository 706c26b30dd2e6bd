//! Health pipelines
//!
//! Indexes health tarballs and derives uptime, reboot, memory, disk, package,
//! route and device series from them.

use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use fleetlog::health;
use fleetlog_cli::{init_tracing, CommonArgs, Session};
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(name = "fleetlog-health", about = "Health log pipelines")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Index new health tarballs into the logs store
    Index,
    /// Extract uptime readings
    Uptime,
    /// Infer reboots from uptime
    Reboots,
    /// Extract memory usage
    Memory,
    /// Extract filesystem usage
    Filesystem,
    /// Detect installed package version changes
    Packages,
    /// Extract default routes
    Iproute,
    /// Count connected devices
    Devices,
    /// Summarize daily peak memory and filesystem usage
    Summarize,
    /// Run every derived pipeline in order
    All,
    /// Rewrite a store as a single run file
    Compact {
        /// Store name
        store: String,
    },
}

async fn run(cli: Cli) -> Result<()> {
    let session = Session::open(&cli.common)?;
    let manager = &session.manager;
    let sinks = &session.sinks;
    let pipeline = match &cli.command {
        Command::Index => health::index_pipeline(manager, &session.tarballs_path()?, session.metrics())?,
        Command::Uptime => health::uptime_pipeline(manager, sinks)?,
        Command::Reboots => health::reboots_pipeline(manager, sinks)?,
        Command::Memory => health::memory_usage_pipeline(manager, sinks)?,
        Command::Filesystem => health::filesystem_usage_pipeline(manager, sinks)?,
        Command::Packages => health::packages_pipeline(manager, sinks)?,
        Command::Iproute => health::ip_route_pipeline(manager, sinks)?,
        Command::Devices => health::devices_count_pipeline(manager)?,
        Command::Summarize => health::summarize_health_pipeline(manager, sinks)?,
        Command::All => health::all_pipelines(manager, sinks)?,
        Command::Compact { store } => {
            manager.compact(store)?;
            info!(store = %store, "compacted");
            return Ok(());
        }
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
            error!("health pipeline failed: {err:#}");
            ExitCode::FAILURE
        }
    }
}
