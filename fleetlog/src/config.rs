//! Run configuration.
//!
//! A [`FleetConfig`] can be loaded from a JSON file; every field has a default
//! so a file only needs to name what it changes. Command-line flags are applied
//! on top by the binaries.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{ErrorContext, FleetError, Result};

/// Tuning for on-disk record stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding one subdirectory per named store
    pub root: PathBuf,
    /// Bytes buffered by a write session before a sorted run is spilled
    pub memtable_bytes: usize,
    /// One sparse index entry is written every this many records
    pub index_interval: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("fleetlog-stores"),
            memtable_bytes: 64 * 1024 * 1024,
            index_interval: 128,
        }
    }
}

/// Tuning for the stage executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Capacity of each bounded channel inside a stage
    pub channel_capacity: usize,
    /// Log record counts as each stage commits
    pub log_stage_counts: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
            log_stage_counts: true,
        }
    }
}

/// Where inputs come from and where sinks write.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Root directory searched for uploaded tarballs
    pub tarballs_path: Option<PathBuf>,
    /// Directory receiving CSV files
    pub csv_output: Option<PathBuf>,
    /// Database file receiving relational tables
    pub sqlite_path: Option<PathBuf>,
}

/// Settings for the availability interval tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AvailabilityConfig {
    /// Largest gap between sightings that still counts as continuous uptime
    pub outage_threshold_secs: i64,
    /// Directory holding per-day interval caches
    pub cache_dir: PathBuf,
    /// First day considered
    pub min_date: NaiveDate,
    /// Where the JSON artifact is written
    pub json_output: Option<PathBuf>,
}

impl Default for AvailabilityConfig {
    fn default() -> Self {
        Self {
            outage_threshold_secs: 300,
            cache_dir: PathBuf::from("availability-cache"),
            // 2012-04-13 is the first day the fleet reported sightings.
            min_date: NaiveDate::from_ymd_opt(2012, 4, 13).unwrap_or_default(),
            json_output: None,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    pub storage: StorageConfig,
    pub pipeline: PipelineConfig,
    pub ingest: IngestConfig,
    pub availability: AvailabilityConfig,
}

impl FleetConfig {
    /// Reads and validates a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: FleetConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.pipeline.channel_capacity == 0 {
            return Err(FleetError::Configuration(
                "pipeline.channel_capacity must be positive".to_string(),
            ));
        }
        if self.storage.memtable_bytes == 0 {
            return Err(FleetError::Configuration(
                "storage.memtable_bytes must be positive".to_string(),
            ));
        }
        if self.storage.index_interval == 0 {
            return Err(FleetError::Configuration(
                "storage.index_interval must be positive".to_string(),
            ));
        }
        if self.availability.outage_threshold_secs < 0 {
            return Err(FleetError::Configuration(
                "availability.outage_threshold_secs cannot be negative".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = FleetConfig::default();
        config.validate().unwrap();
        assert_eq!(config.availability.outage_threshold_secs, 300);
        assert_eq!(
            config.availability.min_date,
            NaiveDate::from_ymd_opt(2012, 4, 13).unwrap()
        );
        assert_eq!(config.pipeline.channel_capacity, 1024);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"storage": {{"root": "/srv/stores"}}, "availability": {{"outage_threshold_secs": 600}}}}"#
        )
        .unwrap();

        let config = FleetConfig::from_file(file.path()).unwrap();
        assert_eq!(config.storage.root, PathBuf::from("/srv/stores"));
        assert_eq!(config.storage.index_interval, 128);
        assert_eq!(config.availability.outage_threshold_secs, 600);
        assert!(config.ingest.csv_output.is_none());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let mut config = FleetConfig::default();
        config.pipeline.channel_capacity = 0;
        assert!(matches!(
            config.validate(),
            Err(FleetError::Configuration(_))
        ));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(FleetConfig::from_file("/nonexistent/fleetlog.json").is_err());
    }
}
