//! Availability intervals
//!
//! Derives per-node sightings from indexed logs and turns them into merged
//! availability intervals, written as a JSON artifact.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use fleetlog::availability::{
    compute_availability, extract_sightings_pipeline, AvailabilityOptions, StoreSightings, SIGHTINGS,
};
use fleetlog::store::StoreManager;
use fleetlog_cli::{init_tracing, CommonArgs, Session};
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(name = "fleetlog-availability", about = "Node availability intervals")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Rebuild the sightings store from indexed logs
    ExtractSightings {
        /// Log kinds that count as a sighting of their node
        #[arg(long, value_delimiter = ',', default_value = "uptime")]
        kinds: Vec<String>,
    },
    /// Update the per-day cache and write the merged intervals
    Run {
        /// Output JSON file
        #[arg(long)]
        output: Option<PathBuf>,

        /// Per-day cache directory
        #[arg(long)]
        cache_dir: Option<PathBuf>,

        /// First day considered (YYYY-MM-DD)
        #[arg(long)]
        min_date: Option<NaiveDate>,

        /// Largest gap between sightings inside one interval, in seconds
        #[arg(long)]
        outage_threshold: Option<i64>,
    },
}

async fn run(cli: Cli) -> Result<()> {
    let session = Session::open(&cli.common)?;
    match cli.command {
        Command::ExtractSightings { kinds } => {
            let kinds: Vec<&str> = kinds.iter().map(String::as_str).collect();
            let pipeline = extract_sightings_pipeline(&session.manager, &kinds)?;
            session.run(pipeline).await?;
        }
        Command::Run {
            output,
            cache_dir,
            min_date,
            outage_threshold,
        } => {
            let config = &session.config.availability;
            let mut options = AvailabilityOptions::from(config);
            if let Some(dir) = cache_dir {
                options.cache_dir = dir;
            }
            if let Some(date) = min_date {
                options.min_date = date;
            }
            if let Some(threshold) = outage_threshold {
                if threshold < 0 {
                    bail!("--outage-threshold cannot be negative");
                }
                options.outage_threshold = threshold;
            }
            let Some(output) = output.or_else(|| config.json_output.clone()) else {
                bail!("no output file; pass --output or set availability.json_output");
            };

            let source = StoreSightings::new(session.manager.seeker(SIGHTINGS)?);
            let availability = compute_availability(&source, &options, Utc::now(), &session.registry)?;
            availability.write_json(&output)?;
            info!(
                nodes = availability.intervals.len(),
                output = %output.display(),
                "availability written"
            );
            session.log_metrics();
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli.common);
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("availability failed: {err:#}");
            ExitCode::FAILURE
        }
    }
}
