//! Pipelines over upload statistics.
//!
//! The uploads indexer records one [`StatsKey`](crate::keys::StatsKey) →
//! [`StatsValue`](crate::keys::StatsValue) per file found in the upload
//! tarballs, without reading file contents. The pipelines here dump those
//! records, summarize their size and arrival distributions, and export
//! per-node creation/arrival timelines.

use std::path::Path;
use std::sync::Arc;

use crate::error::Result;
use crate::indexer::{index_tarballs_pipeline, UploadStats};
use crate::metrics::SharedMetrics;
use crate::pipeline::Pipeline;
use crate::sinks::Sinks;
use crate::store::{Column, StoreManager};

pub mod summarize;
pub mod times;

pub use summarize::{ordinal, summarize_pipeline};
pub use times::times_csv_pipeline;

/// Store of raw upload statistics.
pub const STATS: &str = "stats";

/// Indexes upload tarballs under `tarballs_path` into [`STATS`].
pub fn index_pipeline<M: StoreManager>(
    manager: &M,
    tarballs_path: &Path,
    metrics: SharedMetrics,
) -> Result<Pipeline> {
    index_tarballs_pipeline(manager, Arc::new(UploadStats), tarballs_path, metrics)
}

/// Dumps [`STATS`] to `stats.csv`.
pub fn csv_pipeline<M: StoreManager>(manager: &M, sinks: &Sinks) -> Result<Pipeline> {
    let stats = manager.reader(STATS)?;
    Ok(Pipeline::new().stages(sinks.csv_stage(
        "WriteStatsCsv",
        stats,
        "stats.csv",
        vec![
            Column::str("experiment"),
            Column::str("node"),
            Column::str("filename"),
        ],
        vec![
            Column::int("received_timestamp"),
            Column::int("creation_timestamp"),
            Column::int("size"),
        ],
    )))
}
