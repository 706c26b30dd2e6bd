//! Uptime samples from the `uptime` log.

use tracing::debug;

use super::{logs_of_kind, read_log};
use crate::codec::encode;
use crate::error::Result;
use crate::pipeline::{map_fn, Pipeline, PipelineStage};
use crate::sinks::Sinks;
use crate::store::{truncating, Column, Record, StoreManager};

/// Store of `(node, timestamp) → uptime_seconds`.
pub const UPTIME: &str = "uptime";

/// Largest believable uptime: a century.
const MAX_UPTIME_SECS: f64 = 100.0 * 365.25 * 86_400.0;

/// Reads the whole seconds of uptime from the first word of the second line.
pub fn extract_uptime(record: Record) -> Result<Option<Record>> {
    let (key, text) = read_log(&record)?;
    let Some(line) = text.split('\n').nth(1) else {
        debug!(node = %key.node, timestamp = key.timestamp, "uptime log has fewer than two lines");
        return Ok(None);
    };
    let word = line.split(' ').next().unwrap_or_default();
    let seconds = match word.parse::<f64>() {
        Ok(seconds) => seconds,
        Err(err) => {
            debug!(node = %key.node, timestamp = key.timestamp, error = %err, "unparseable uptime");
            return Ok(None);
        }
    };
    // Anything outside [0, MAX_UPTIME_SECS] is a corrupt counter, not an uptime.
    if !(0.0..=MAX_UPTIME_SECS).contains(&seconds) {
        debug!(node = %key.node, timestamp = key.timestamp, seconds, "uptime out of range");
        return Ok(None);
    }
    Ok(Some(Record::new(
        encode(&(key.node.as_str(), key.timestamp)),
        encode(&(seconds as i64)),
    )))
}

pub fn uptime_pipeline<M: StoreManager>(manager: &M, sinks: &Sinks) -> Result<Pipeline> {
    let uptime = manager.open(UPTIME)?;
    let keys = || vec![Column::str("node"), Column::int("timestamp")];
    let values = || vec![Column::int("uptime")];

    Ok(Pipeline::new()
        .stage(
            PipelineStage::new("Uptime", logs_of_kind(manager, &["uptime"])?)
                .transform(map_fn(extract_uptime))
                .writer(truncating(uptime.clone())),
        )
        .stages(sinks.csv_stage("WriteUptimeCsv", uptime.clone(), "uptime.csv", keys(), values()))
        .stages(sinks.sqlite_stage("WriteUptimeSqlite", uptime, UPTIME, keys(), values())?))
}
