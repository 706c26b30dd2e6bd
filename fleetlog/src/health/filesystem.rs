//! Per-mount disk usage from `df`.

use tracing::debug;

use super::{logs_of_kind, read_log};
use crate::codec::encode;
use crate::error::Result;
use crate::pipeline::{do_fn, Emitter, Pipeline, PipelineStage};
use crate::sinks::Sinks;
use crate::store::{truncating, Column, Record, StoreManager};

/// Store of `(mount, node, timestamp) → (used_kb, free_kb)`.
pub const FILESYSTEM: &str = "filesystem";

/// Emits one record per mount listed after the `df` header line. Lines
/// without six columns or with non-numeric figures are skipped.
pub fn extract_filesystem_usage(record: Record, output: &Emitter) -> Result<()> {
    let (key, text) = read_log(&record)?;
    for line in text.split('\n').skip(1) {
        if line.len() <= 1 {
            continue;
        }
        let words: Vec<&str> = line.split_whitespace().collect();
        if words.len() < 6 {
            debug!(node = %key.node, line, "df line has fewer than six columns");
            continue;
        }
        let (Ok(used), Ok(free)) = (words[2].parse::<i64>(), words[3].parse::<i64>()) else {
            debug!(node = %key.node, line, "df line has non-numeric usage");
            continue;
        };
        let mount = words[5].trim_matches('\0');
        output.emit(Record::new(
            encode(&(mount, key.node.as_str(), key.timestamp)),
            encode(&(used, free)),
        ))?;
    }
    Ok(())
}

pub fn filesystem_usage_pipeline<M: StoreManager>(manager: &M, sinks: &Sinks) -> Result<Pipeline> {
    let filesystem = manager.open(FILESYSTEM)?;
    Ok(Pipeline::new()
        .stage(
            PipelineStage::new("Filesystem", logs_of_kind(manager, &["df"])?)
                .transform(do_fn(extract_filesystem_usage))
                .writer(truncating(filesystem.clone())),
        )
        .stages(sinks.csv_stage(
            "WriteFilesystemUsageCsv",
            filesystem,
            "filesystem.csv",
            vec![Column::str("mount"), Column::str("node"), Column::int("timestamp")],
            vec![Column::int("used"), Column::int("free")],
        )))
}
