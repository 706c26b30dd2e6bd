//! fleetlog command-line tools
//!
//! Shared plumbing for the `fleetlog-*` binaries: common flags, config
//! loading, store and sink setup, and pipeline execution with a metrics
//! summary at the end.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Args;
use fleetlog::config::FleetConfig;
use fleetlog::logging::setup::{init_logging, LoggingConfig};
use fleetlog::logging::LogConfig;
use fleetlog::metrics::{MetricsRegistry, SharedMetrics};
use fleetlog::pipeline::{run_pipeline, Pipeline, PipelineOptions, PipelineReport};
use fleetlog::sinks::Sinks;
use fleetlog::store::DiskManager;
use tracing::{info, warn};

/// Flags accepted by every binary.
#[derive(Debug, Clone, Args)]
pub struct CommonArgs {
    /// JSON configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding the record stores
    #[arg(long, global = true)]
    pub store_root: Option<PathBuf>,

    /// Root directory of uploaded tarballs
    #[arg(long, global = true)]
    pub tarballs: Option<PathBuf>,

    /// Directory receiving CSV exports
    #[arg(long, global = true)]
    pub csv_output: Option<PathBuf>,

    /// SQLite database receiving relational exports
    #[arg(long, global = true)]
    pub sqlite: Option<PathBuf>,

    /// Log as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

impl CommonArgs {
    /// Loads the configuration file, if any, and applies flag overrides.
    pub fn load_config(&self) -> Result<FleetConfig> {
        let mut config = match &self.config {
            Some(path) => FleetConfig::from_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => FleetConfig::default(),
        };
        if let Some(root) = &self.store_root {
            config.storage.root = root.clone();
        }
        if let Some(tarballs) = &self.tarballs {
            config.ingest.tarballs_path = Some(tarballs.clone());
        }
        if let Some(csv) = &self.csv_output {
            config.ingest.csv_output = Some(csv.clone());
        }
        if let Some(sqlite) = &self.sqlite {
            config.ingest.sqlite_path = Some(sqlite.clone());
        }
        config.validate()?;
        Ok(config)
    }

    /// Engine options from `config`; `--verbose` also logs every skipped entry.
    pub fn pipeline_options(&self, config: &FleetConfig) -> PipelineOptions {
        let options = PipelineOptions::from(config);
        if self.verbose {
            options.with_log(LogConfig::verbose())
        } else {
            options
        }
    }

    pub fn logging_config(&self) -> LoggingConfig {
        let config = if self.verbose {
            LoggingConfig::development()
        } else {
            LoggingConfig::production()
        };
        config.with_json_format(self.json_logs)
    }
}

/// Initialize tracing on stderr
pub fn init_tracing(args: &CommonArgs) {
    if let Err(err) = init_logging(args.logging_config()) {
        eprintln!("cannot install tracing subscriber: {err}");
    }
}

/// Everything a subcommand needs to build and run pipelines.
#[derive(Debug)]
pub struct Session {
    pub config: FleetConfig,
    pub options: PipelineOptions,
    pub manager: DiskManager,
    pub sinks: Sinks,
    pub registry: MetricsRegistry,
}

impl Session {
    pub fn open(args: &CommonArgs) -> Result<Self> {
        let config = args.load_config()?;
        if config.ingest.sqlite_path.is_some() && !cfg!(feature = "sqlite") {
            warn!("sqlite output requested but this build has no sqlite support; skipping it");
        }
        let manager = DiskManager::from_config(&config.storage)
            .with_context(|| format!("opening stores under {}", config.storage.root.display()))?;
        let sinks = Sinks::from_config(&config.ingest);
        Ok(Self {
            options: args.pipeline_options(&config),
            config,
            manager,
            sinks,
            registry: MetricsRegistry::new(),
        })
    }

    pub fn metrics(&self) -> SharedMetrics {
        Arc::new(self.registry.clone())
    }

    /// Configured tarball root, required by the indexing commands.
    pub fn tarballs_path(&self) -> Result<PathBuf> {
        match &self.config.ingest.tarballs_path {
            Some(path) => Ok(path.clone()),
            None => bail!("no tarball directory; pass --tarballs or set ingest.tarballs_path"),
        }
    }

    /// Runs `pipeline`, then logs the metrics gathered.
    pub async fn run(&self, pipeline: Pipeline) -> Result<PipelineReport> {
        let report = run_pipeline(pipeline, &self.options).await?;
        self.log_metrics();
        Ok(report)
    }

    pub fn log_metrics(&self) {
        let snapshot = self.registry.snapshot();
        if snapshot.counters.is_empty() && snapshot.texts.is_empty() {
            return;
        }
        match serde_json::to_string(&snapshot) {
            Ok(json) => info!(metrics = %json, "run metrics"),
            Err(err) => warn!(error = %err, "cannot render metrics"),
        }
    }
}
