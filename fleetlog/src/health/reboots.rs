//! Reboot times inferred from uptime samples.

use super::uptime::UPTIME;
use crate::codec::{decode, encode};
use crate::error::Result;
use crate::pipeline::{group_fn, Emitter, Grouper, Pipeline, PipelineStage};
use crate::sinks::Sinks;
use crate::stats::RebootTracker;
use crate::store::{truncating, Column, Record, StoreManager};

/// Store of `(node, boot_timestamp)` keys with empty values.
pub const REBOOTS: &str = "reboots";

/// Walks each node's uptime samples in time order and emits one key per
/// inferred boot.
pub fn infer_reboots(grouper: &mut Grouper<(String,)>, output: &Emitter) -> Result<()> {
    while let Some((node,)) = grouper.next_group()? {
        let mut tracker = RebootTracker::new();
        let boot_record = |boot: i64| Record::key_only(encode(&(node.as_str(), boot)));
        while let Some(record) = grouper.next_record()? {
            let timestamp: i64 = record.decode_suffix()?;
            let uptime: i64 = decode(record.value())?;
            if let Some(boot) = tracker.observe(timestamp, uptime) {
                output.emit(boot_record(boot))?;
            }
        }
        if let Some(boot) = tracker.finish() {
            output.emit(boot_record(boot))?;
        }
    }
    Ok(())
}

pub fn reboots_pipeline<M: StoreManager>(manager: &M, sinks: &Sinks) -> Result<Pipeline> {
    let uptime = manager.open(UPTIME)?;
    let reboots = manager.open(REBOOTS)?;
    let keys = || vec![Column::str("node"), Column::int("boot_timestamp")];

    Ok(Pipeline::new()
        .stage(
            PipelineStage::new("InferReboots", uptime)
                .transform(group_fn(infer_reboots))
                .writer(truncating(reboots.clone())),
        )
        .stages(sinks.csv_stage("WriteRebootsCsv", reboots.clone(), "reboots.csv", keys(), vec![]))
        .stages(sinks.sqlite_stage("WriteRebootsSqlite", reboots, REBOOTS, keys(), vec![])?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::apply;

    fn sample(node: &str, ts: i64, uptime: i64) -> Record {
        Record::new(encode(&(node, ts)), encode(&uptime))
    }

    #[test]
    fn test_one_boot_per_run() {
        let input = vec![
            sample("a", 0, 100),
            sample("a", 50, 150),
            sample("a", 60, 10),
            sample("a", 120, 70),
            sample("b", 1000, 10),
        ];
        let output = apply(group_fn(infer_reboots).as_mut(), input).unwrap();
        let boots: Vec<(String, i64)> = output.iter().map(|r| decode(&r.key).unwrap()).collect();
        assert_eq!(
            boots,
            vec![
                ("a".to_string(), -100),
                ("a".to_string(), 50),
                ("b".to_string(), 990),
            ]
        );
        assert!(output.iter().all(|r| r.value.is_empty()));
    }

    #[test]
    fn test_tracker_resets_between_nodes() {
        // b's small uptime must not be read as a drop after a's large one.
        let input = vec![sample("a", 500, 400), sample("b", 600, 5)];
        let output = apply(group_fn(infer_reboots).as_mut(), input).unwrap();
        assert_eq!(output.len(), 2);
    }
}
