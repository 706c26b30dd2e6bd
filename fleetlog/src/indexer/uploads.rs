//! Upload statistics: one record per uploaded file, taken from the archive
//! headers alone.
//!
//! Entries are named `<experiment>_<node>_<YYYYMMDD>_<HHMMSS>/<file>`. The
//! creation time of the file is recovered from its name, in a format that
//! depends on the experiment.

use std::io::Read;

use super::{EntryContext, EntryMeta, LogFamily};
use crate::codec::encode;
use crate::error::{FleetError, Result};
use crate::keys::{StatsKey, StatsValue};
use crate::metrics::MetricsSink;
use crate::time::parse_date_time;

const MICROS_PER_SECOND: i64 = 1_000_000;

#[derive(Debug, Default, Clone, Copy)]
pub struct UploadStats;

/// Counter incremented when the creation time of an upload cannot be parsed.
pub fn timestamp_skipped_counter(experiment: &str) -> String {
    format!("timestamp_skipped.{experiment}")
}

/// Creation time encoded in an upload's file name, if this experiment has one.
///
/// Returns `Ok(None)` for experiments whose names carry no timestamp and `Err`
/// for names that should carry one but do not parse.
pub fn creation_timestamp(experiment: &str, file_name: &str) -> Result<Option<i64>> {
    let malformed = || FleetError::Parse(format!("no {experiment} timestamp in '{file_name}'"));
    let int = |s: &str| s.parse::<i64>().map_err(|_| malformed());

    let timestamp = match experiment {
        "active" => {
            let pieces: Vec<&str> = file_name.split('_').collect();
            let [_, unix] = pieces.as_slice() else {
                return Err(malformed());
            };
            int(unix.trim_end_matches(".xml"))?
        }
        "bismark-experiments-manager" | "bismark-updater" => {
            let pieces: Vec<&str> = file_name.split('_').collect();
            let [_, date, time] = pieces.as_slice() else {
                return Err(malformed());
            };
            parse_date_time(date, time.trim_end_matches(".gz"))?
        }
        "health" => {
            let pieces: Vec<&str> = file_name.split('_').collect();
            let [_, _, date, time] = pieces.as_slice() else {
                return Err(malformed());
            };
            parse_date_time(date, time.trim_end_matches(".tar.gz"))?
        }
        "mac-analyzer" => {
            let pieces: Vec<&str> = file_name.split('-').collect();
            if pieces.len() < 3 {
                return Err(malformed());
            }
            int(pieces[1])? / MICROS_PER_SECOND
        }
        "passive" | "passive-frequent" => {
            let pieces: Vec<&str> = file_name.split('-').collect();
            let [_, base, sequence] = pieces.as_slice() else {
                return Err(malformed());
            };
            let base = int(*base)? / MICROS_PER_SECOND;
            if experiment == "passive" {
                base + 30 * int(sequence.trim_end_matches(".gz"))?
            } else {
                base + 5 * int(*sequence)?
            }
        }
        _ => return Ok(None),
    };
    Ok(Some(timestamp))
}

/// Builds the stats record for one archive entry. `None` when the directory
/// name does not identify an experiment and node.
pub fn parse_stats_entry(entry: &EntryMeta, metrics: &dyn MetricsSink) -> Option<(StatsKey, StatsValue)> {
    let pieces: Vec<&str> = entry.dir_name().split('_').collect();
    let [experiment, node, _, _] = pieces.as_slice() else {
        return None;
    };
    let file_name = entry.file_name();
    let created = match creation_timestamp(experiment, file_name) {
        Ok(Some(timestamp)) => timestamp,
        Ok(None) => -1,
        Err(_) => {
            metrics.increment(&timestamp_skipped_counter(experiment));
            -1
        }
    };
    Some((
        StatsKey {
            experiment: experiment.to_string(),
            node: node.to_string(),
            filename: file_name.to_string(),
        },
        StatsValue {
            received: entry.mtime,
            created,
            size: i64::try_from(entry.size).unwrap_or(i64::MAX),
        },
    ))
}

impl LogFamily for UploadStats {
    fn name(&self) -> &str {
        "upload-stats"
    }

    fn tarball_pattern(&self) -> &str {
        "*/*/*/*.tar.gz"
    }

    fn output_store(&self) -> &str {
        "stats"
    }

    fn index_entry(&self, entry: &EntryMeta, _contents: &mut dyn Read, ctx: &EntryContext<'_>) -> Result<()> {
        match parse_stats_entry(entry, ctx.metrics()) {
            Some((key, value)) => ctx.emit(encode(&key), encode(&value)),
            None => {
                ctx.skip(
                    &entry.path,
                    "directory must have format 'EXPERIMENT_NODE_YYYYMMDD_HHMMSS'",
                );
                Ok(())
            }
        }
    }
}
