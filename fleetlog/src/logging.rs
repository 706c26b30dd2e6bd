//! Logging configuration for fleetlog.
//!
//! The library only emits `tracing` events; binaries decide where they go by
//! calling [`setup::init_logging`].

/// Controls how chatty the pipeline engine and the indexer are.
///
/// Levels are left to the subscriber; these switches decide which events are
/// emitted at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Whether stage completion (record counts, elapsed time) is logged at info
    pub log_stage_counts: bool,
    /// Whether every skipped tarball entry is logged at debug
    pub log_skipped_items: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_stage_counts: true,
            log_skipped_items: false,
        }
    }
}

impl LogConfig {
    /// Creates a verbose configuration suitable for debugging extractors.
    pub fn verbose() -> Self {
        Self {
            log_stage_counts: true,
            log_skipped_items: true,
        }
    }
}

/// Subscriber setup for binaries.
pub mod setup {
    use tracing::Level;

    /// Configuration for the global tracing subscriber.
    #[derive(Debug, Clone)]
    pub struct LoggingConfig {
        /// Log level for dependencies
        pub level: Level,
        /// Log level for fleetlog crates
        pub fleetlog_level: Level,
        /// Whether to use JSON output format
        pub json_format: bool,
        /// Environment filter override
        pub env_filter: Option<String>,
    }

    impl Default for LoggingConfig {
        fn default() -> Self {
            Self {
                level: Level::WARN,
                fleetlog_level: Level::INFO,
                json_format: false,
                env_filter: None,
            }
        }
    }

    impl LoggingConfig {
        /// JSON lines at info, for log shipping.
        pub fn production() -> Self {
            Self {
                level: Level::WARN,
                fleetlog_level: Level::INFO,
                json_format: true,
                env_filter: None,
            }
        }

        /// Human-readable output with debug events from fleetlog.
        pub fn development() -> Self {
            Self {
                level: Level::INFO,
                fleetlog_level: Level::DEBUG,
                json_format: false,
                env_filter: None,
            }
        }

        pub fn with_level(mut self, level: Level) -> Self {
            self.level = level;
            self
        }

        pub fn with_fleetlog_level(mut self, level: Level) -> Self {
            self.fleetlog_level = level;
            self
        }

        pub fn with_json_format(mut self, enabled: bool) -> Self {
            self.json_format = enabled;
            self
        }

        pub fn with_env_filter(mut self, filter: impl Into<String>) -> Self {
            self.env_filter = Some(filter.into());
            self
        }

        /// Builds the environment filter string.
        pub fn env_filter(&self) -> String {
            if let Some(ref filter) = self.env_filter {
                filter.clone()
            } else {
                let fleetlog = self.fleetlog_level.as_str().to_lowercase();
                format!(
                    "{},fleetlog={fleetlog},fleetlog_cli={fleetlog}",
                    self.level.as_str().to_lowercase(),
                )
            }
        }
    }

    /// Installs the global subscriber, writing to stderr.
    ///
    /// `RUST_LOG` takes precedence over the configured filter.
    ///
    /// ```rust,no_run
    /// use fleetlog::logging::setup::{init_logging, LoggingConfig};
    ///
    /// init_logging(LoggingConfig::development().with_json_format(true)).unwrap();
    /// ```
    pub fn init_logging(config: LoggingConfig) -> Result<(), Box<dyn std::error::Error>> {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.env_filter()));

        let fmt_layer = if config.json_format {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .boxed()
        } else {
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .boxed()
        };

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;

        Ok(())
    }
}
