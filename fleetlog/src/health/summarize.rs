//! Daily peaks of memory and filesystem usage.
//!
//! Samples are first rekeyed so that each UTC day forms one contiguous group,
//! then each group is reduced to the highest `used` figure per node.

use std::collections::BTreeMap;

use super::filesystem::FILESYSTEM;
use super::memory::MEMORY;
use crate::codec::{decode, encode, KeyDecode};
use crate::error::Result;
use crate::pipeline::{group_fn, map_fn, Emitter, Grouper, Pipeline, PipelineStage};
use crate::sinks::Sinks;
use crate::store::{truncating, Column, Record, StoreManager};
use crate::time::truncate_to_day;

pub const MEMORY_USAGE_BY_DAY: &str = "memory-usage-by-day";
pub const MEMORY_USAGE_BY_DAY_SUMMARIZED: &str = "memory-usage-by-day-summarized";
pub const FILESYSTEM_USAGE_BY_DAY: &str = "filesystem-usage-by-day";
pub const FILESYSTEM_USAGE_BY_DAY_SUMMARIZED: &str = "filesystem-usage-by-day-summarized";

/// `(node, ts)` → `(day, node, ts)`.
pub fn order_memory_by_day(record: Record) -> Result<Option<Record>> {
    let (node, timestamp): (String, i64) = decode(&record.key)?;
    Ok(Some(Record::new(
        encode(&(truncate_to_day(timestamp), node, timestamp)),
        record.value,
    )))
}

/// `(mount, node, ts)` → `(mount, day, node, ts)`.
pub fn order_filesystem_by_day(record: Record) -> Result<Option<Record>> {
    let (mount, node, timestamp): (String, String, i64) = decode(&record.key)?;
    Ok(Some(Record::new(
        encode(&(mount, truncate_to_day(timestamp), node, timestamp)),
        record.value,
    )))
}

/// Highest `used` per node over the rest of the current group. Keys must end
/// in `(node, ts)` and values hold `(used, free)`.
fn peak_usage_by_node<P: KeyDecode>(grouper: &mut Grouper<P>) -> Result<BTreeMap<String, i64>> {
    let mut usage = BTreeMap::new();
    while let Some(record) = grouper.next_record()? {
        let (node, _timestamp): (String, i64) = record.decode_suffix()?;
        let (used, _free): (i64, i64) = decode(record.value())?;
        usage
            .entry(node)
            .and_modify(|peak: &mut i64| *peak = (*peak).max(used))
            .or_insert(used);
    }
    Ok(usage)
}

pub fn summarize_memory_usage(grouper: &mut Grouper<(i64,)>, output: &Emitter) -> Result<()> {
    while let Some((day,)) = grouper.next_group()? {
        for (node, used) in peak_usage_by_node(grouper)? {
            output.emit(Record::new(encode(&(day, node)), encode(&used)))?;
        }
    }
    Ok(())
}

pub fn summarize_filesystem_usage(grouper: &mut Grouper<(String, i64)>, output: &Emitter) -> Result<()> {
    while let Some((mount, day)) = grouper.next_group()? {
        for (node, used) in peak_usage_by_node(grouper)? {
            output.emit(Record::new(encode(&(mount.as_str(), day, node)), encode(&used)))?;
        }
    }
    Ok(())
}

pub fn summarize_health_pipeline<M: StoreManager>(manager: &M, sinks: &Sinks) -> Result<Pipeline> {
    let memory = manager.open(MEMORY)?;
    let memory_by_day = manager.open(MEMORY_USAGE_BY_DAY)?;
    let memory_summary = manager.open(MEMORY_USAGE_BY_DAY_SUMMARIZED)?;
    let filesystem = manager.open(FILESYSTEM)?;
    let filesystem_by_day = manager.open(FILESYSTEM_USAGE_BY_DAY)?;
    let filesystem_summary = manager.open(FILESYSTEM_USAGE_BY_DAY_SUMMARIZED)?;

    Ok(Pipeline::new()
        .stage(
            PipelineStage::new("OrderMemoryUsageByTimestamp", memory)
                .transform(map_fn(order_memory_by_day))
                .writer(truncating(memory_by_day.clone())),
        )
        .stage(
            PipelineStage::new("SummarizeMemoryUsage", memory_by_day)
                .transform(group_fn(summarize_memory_usage))
                .writer(truncating(memory_summary.clone())),
        )
        .stages(sinks.csv_stage(
            "WriteMemoryUsageSummaryCsv",
            memory_summary,
            "memory-usage-summary.csv",
            vec![Column::int("timestamp"), Column::str("node")],
            vec![Column::int("usage")],
        ))
        .stage(
            PipelineStage::new("OrderFilesystemUsageByTimestamp", filesystem)
                .transform(map_fn(order_filesystem_by_day))
                .writer(truncating(filesystem_by_day.clone())),
        )
        .stage(
            PipelineStage::new("SummarizeFilesystemUsage", filesystem_by_day)
                .transform(group_fn(summarize_filesystem_usage))
                .writer(truncating(filesystem_summary.clone())),
        )
        .stages(sinks.csv_stage(
            "WriteFilesystemUsageSummaryCsv",
            filesystem_summary,
            "filesystem-usage-summary.csv",
            vec![
                Column::str("filesystem"),
                Column::int("timestamp"),
                Column::str("node"),
            ],
            vec![Column::int("usage")],
        )))
}
