//! Optional CSV and SQLite outputs of the derived pipelines.

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::IngestConfig;
use crate::error::Result;
use crate::pipeline::PipelineStage;
use crate::store::{Column, CsvFileManager, StoreReader};
#[cfg(feature = "sqlite")]
use crate::store::SqliteManager;

/// Where derived stores are exported. Either output may be absent, in which
/// case the corresponding stages are left out of the pipeline.
#[derive(Debug, Clone, Default)]
pub struct Sinks {
    csv: Option<CsvFileManager>,
    #[cfg(feature = "sqlite")]
    sqlite: Option<SqliteManager>,
}

impl Sinks {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_csv(mut self, dir: impl Into<PathBuf>) -> Self {
        self.csv = Some(CsvFileManager::new(dir));
        self
    }

    #[cfg(feature = "sqlite")]
    pub fn with_sqlite(mut self, path: impl Into<PathBuf>) -> Self {
        self.sqlite = Some(SqliteManager::new(path));
        self
    }

    pub fn from_config(ingest: &IngestConfig) -> Self {
        let mut sinks = Self::none();
        if let Some(dir) = &ingest.csv_output {
            sinks = sinks.with_csv(dir);
        }
        #[cfg(feature = "sqlite")]
        if let Some(path) = &ingest.sqlite_path {
            sinks = sinks.with_sqlite(path);
        }
        sinks
    }

    pub fn csv(&self) -> Option<&CsvFileManager> {
        self.csv.as_ref()
    }

    /// A stage copying `source` into the CSV file `file`.
    pub fn csv_stage(
        &self,
        name: &str,
        source: Arc<dyn StoreReader>,
        file: &str,
        keys: Vec<Column>,
        values: Vec<Column>,
    ) -> Option<PipelineStage> {
        let csv = self.csv.as_ref()?;
        Some(PipelineStage::new(name, source).writer(csv.writer(file, keys, values)))
    }

    /// A stage replacing the SQLite table `table` with `source`.
    #[cfg(feature = "sqlite")]
    pub fn sqlite_stage(
        &self,
        name: &str,
        source: Arc<dyn StoreReader>,
        table: &str,
        keys: Vec<Column>,
        values: Vec<Column>,
    ) -> Result<Option<PipelineStage>> {
        let Some(sqlite) = &self.sqlite else {
            return Ok(None);
        };
        let writer = sqlite.writer(table, keys, values)?;
        Ok(Some(PipelineStage::new(name, source).writer(writer)))
    }

    #[cfg(not(feature = "sqlite"))]
    pub fn sqlite_stage(
        &self,
        _name: &str,
        _source: Arc<dyn StoreReader>,
        _table: &str,
        _keys: Vec<Column>,
        _values: Vec<Column>,
    ) -> Result<Option<PipelineStage>> {
        Ok(None)
    }
}
