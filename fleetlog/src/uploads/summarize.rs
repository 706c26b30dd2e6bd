//! Size and interarrival distributions of uploads.
//!
//! Distributions are approximated with a [`QuantileSample`] per group and
//! stored as `[count, q0, q1, ...]`. Rekeyed copies of `stats` exist only to
//! bring the right records together and are deleted once the run ends.

use std::collections::BTreeMap;

use super::STATS;
use crate::codec::{decode, encode, KeyDecode, KeyEncode};
use crate::error::Result;
use crate::keys::{StatsKey, StatsValue};
use crate::pipeline::{
    group_fn, map_fn, stream_fn, Emitter, GroupRecord, Grouper, Pipeline, PipelineStage,
    RecordStream,
};
use crate::sinks::Sinks;
use crate::stats::QuantileSample;
use crate::store::{truncating, Column, Record, StoreManager, StoreWriter};
use crate::time::{truncate_to_day, truncate_to_hour};

pub const STATS_WITH_HOUR: &str = "stats-with-hour";
pub const STATS_WITH_DAY: &str = "stats-with-day";
pub const STATS_WITH_RECEIVED_TIMESTAMP: &str = "stats-with-received-timestamp";
pub const INTERARRIVAL_TIMES: &str = "interarrival-times";
pub const SIZE_SUMMARY: &str = "size-summary";
pub const SIZE_SUMMARY_BY_HOUR: &str = "size-summary-by-hour";
pub const SIZE_SUMMARY_BY_DAY: &str = "size-summary-by-day";
pub const INTERARRIVAL_TIMES_SUMMARY: &str = "interarrival-times-summary";
pub const SIZES_PER_DAY: &str = "sizes-per-day";

/// Pseudo-experiment aggregating every experiment in [`SIZES_PER_DAY`].
pub const ALL_EXPERIMENTS: &str = "all";

/// Sample size of the overall summaries: 5-percentile steps.
const COARSE_SAMPLE: usize = 21;
/// Sample size of the time-bucketed summaries: 1-percentile steps.
const FINE_SAMPLE: usize = 101;
/// Percentiles kept from a [`FINE_SAMPLE`].
const KEPT_PERCENTILES: [usize; 11] = [0, 1, 5, 10, 25, 50, 75, 90, 95, 99, 100];

/// English ordinal of `n`: `0th`, `1st`, `22nd`, `113th`.
pub fn ordinal(n: usize) -> String {
    let suffix = match (n % 10, n % 100) {
        (_, 11..=13) => "th",
        (1, _) => "st",
        (2, _) => "nd",
        (3, _) => "rd",
        _ => "th",
    };
    format!("{n}{suffix}")
}

/// Feeds each group through `sample` and emits `prefix → [count, quantiles...]`.
/// With `keep`, only the quantiles at those positions are stored.
fn summarize_groups<P, F>(
    grouper: &mut Grouper<P>,
    output: &Emitter,
    sample: &mut QuantileSample,
    keep: Option<&[usize]>,
    value_of: F,
) -> Result<()>
where
    P: KeyDecode + KeyEncode,
    F: Fn(&GroupRecord) -> Result<i64>,
{
    while let Some(prefix) = grouper.next_group()? {
        while let Some(record) = grouper.next_record()? {
            sample.append(value_of(&record)?);
        }
        let quantiles = sample.quantiles();
        let mut statistics = vec![i64::try_from(sample.count()).unwrap_or(i64::MAX)];
        match keep {
            Some(positions) => statistics.extend(positions.iter().filter_map(|&i| quantiles.get(i))),
            None => statistics.extend(quantiles),
        }
        sample.reset();
        output.emit(Record::new(encode(&prefix), encode(&statistics)))?;
    }
    Ok(())
}

fn upload_size(record: &GroupRecord) -> Result<i64> {
    Ok(decode::<StatsValue>(record.value())?.size)
}

/// `(experiment, node, filename)` → `(experiment, node, bucket(received), filename)`.
fn rekey_by_bucket(record: Record, bucket: fn(i64) -> i64) -> Result<Option<Record>> {
    let key: StatsKey = decode(&record.key)?;
    let value: StatsValue = decode(&record.value)?;
    Ok(Some(Record::new(
        encode(&(key.experiment, key.node, bucket(value.received), key.filename)),
        record.value,
    )))
}

pub fn rekey_stats_by_hour(record: Record) -> Result<Option<Record>> {
    rekey_by_bucket(record, truncate_to_hour)
}

pub fn rekey_stats_by_day(record: Record) -> Result<Option<Record>> {
    rekey_by_bucket(record, truncate_to_day)
}

/// `(experiment, node, filename)` → `(experiment, node, received, filename)`, no value.
pub fn rekey_stats_by_received_timestamp(record: Record) -> Result<Option<Record>> {
    let key: StatsKey = decode(&record.key)?;
    let value: StatsValue = decode(&record.value)?;
    Ok(Some(Record::key_only(encode(&(
        key.experiment,
        key.node,
        value.received,
        key.filename,
    )))))
}

/// Emits `(experiment, node, gap, filename)` for each upload after the first
/// of its node, where `gap` is the time since the previous arrival.
pub fn compute_interarrival_times(grouper: &mut Grouper<(String, String)>, output: &Emitter) -> Result<()> {
    while let Some((experiment, node)) = grouper.next_group()? {
        let mut last: Option<i64> = None;
        while let Some(record) = grouper.next_record()? {
            let (received, filename): (i64, String) = record.decode_suffix()?;
            if let Some(previous) = last {
                output.emit(Record::key_only(encode(&(
                    experiment.as_str(),
                    node.as_str(),
                    received - previous,
                    filename,
                ))))?;
            }
            last = Some(received);
        }
    }
    Ok(())
}

/// Total bytes received per `(experiment, node, day)`.
pub fn summarize_sizes_per_day(grouper: &mut Grouper<(String, String)>, output: &Emitter) -> Result<()> {
    while let Some((experiment, node)) = grouper.next_group()? {
        let mut per_day: BTreeMap<i64, i64> = BTreeMap::new();
        while let Some(record) = grouper.next_record()? {
            let value: StatsValue = decode(record.value())?;
            *per_day.entry(truncate_to_day(value.received)).or_default() += value.size;
        }
        for (day, size) in per_day {
            output.emit(Record::new(
                encode(&(experiment.as_str(), node.as_str(), day)),
                encode(&size),
            ))?;
        }
    }
    Ok(())
}

/// Sums [`SIZES_PER_DAY`] across experiments into `(all, node, day)` records.
pub fn aggregate_sizes_per_day(input: RecordStream, output: &Emitter) -> Result<()> {
    let mut totals: BTreeMap<(String, i64), i64> = BTreeMap::new();
    for record in input {
        let (experiment, node, day): (String, String, i64) = decode(&record.key)?;
        if experiment == ALL_EXPERIMENTS {
            continue;
        }
        *totals.entry((node, day)).or_default() += decode::<i64>(&record.value)?;
    }
    for ((node, day), size) in totals {
        output.emit(Record::new(
            encode(&(ALL_EXPERIMENTS, node, day)),
            encode(&size),
        ))?;
    }
    Ok(())
}

fn summary_columns(keys: &[&str], percentiles: impl IntoIterator<Item = usize>) -> (Vec<Column>, Vec<Column>) {
    let keys = keys
        .iter()
        .map(|name| {
            if *name == "timestamp" {
                Column::int(*name)
            } else {
                Column::str(*name)
            }
        })
        .collect();
    let values = std::iter::once(Column::int("count"))
        .chain(percentiles.into_iter().map(|p| Column::int(ordinal(p))))
        .collect();
    (keys, values)
}

pub fn summarize_pipeline<M: StoreManager>(manager: &M, sinks: &Sinks) -> Result<Pipeline> {
    let stats = manager.open(STATS)?;
    let with_hour = manager.open(STATS_WITH_HOUR)?;
    let with_day = manager.open(STATS_WITH_DAY)?;
    let with_received = manager.open(STATS_WITH_RECEIVED_TIMESTAMP)?;
    let interarrival = manager.open(INTERARRIVAL_TIMES)?;
    let size_summary = manager.open(SIZE_SUMMARY)?;
    let by_hour_summary = manager.open(SIZE_SUMMARY_BY_HOUR)?;
    let by_day_summary = manager.open(SIZE_SUMMARY_BY_DAY)?;
    let interarrival_summary = manager.open(INTERARRIVAL_TIMES_SUMMARY)?;
    let sizes_per_day = manager.open(SIZES_PER_DAY)?;
    let sizes_per_day_merge: std::sync::Arc<dyn StoreWriter> = sizes_per_day.clone();

    let coarse = summary_columns(&["experiment", "node"], (0..=100).step_by(5));
    let fine = summary_columns(&["experiment", "node", "timestamp"], KEPT_PERCENTILES);

    let mut sizes = QuantileSample::new(COARSE_SAMPLE);
    let mut sizes_by_hour = QuantileSample::new(FINE_SAMPLE);
    let mut sizes_by_day = QuantileSample::new(FINE_SAMPLE);
    let mut gaps = QuantileSample::new(COARSE_SAMPLE);

    Ok(Pipeline::new()
        .stage(
            PipelineStage::new("SummarizeSizes", stats.clone())
                .transform(group_fn(move |g: &mut Grouper<(String, String)>, out: &Emitter| {
                    summarize_groups(g, out, &mut sizes, None, upload_size)
                }))
                .writer(truncating(size_summary.clone())),
        )
        .stage(
            PipelineStage::new("RekeyStatsByHour", stats.clone())
                .transform(map_fn(rekey_stats_by_hour))
                .writer(truncating(with_hour.clone())),
        )
        .stage(
            PipelineStage::new("SummarizeSizesByHour", with_hour.clone())
                .transform(group_fn(move |g: &mut Grouper<(String, String, i64)>, out: &Emitter| {
                    summarize_groups(g, out, &mut sizes_by_hour, Some(&KEPT_PERCENTILES), upload_size)
                }))
                .writer(truncating(by_hour_summary.clone())),
        )
        .stage(
            PipelineStage::new("RekeyStatsByDay", stats.clone())
                .transform(map_fn(rekey_stats_by_day))
                .writer(truncating(with_day.clone())),
        )
        .stage(
            PipelineStage::new("SummarizeSizesByDay", with_day.clone())
                .transform(group_fn(move |g: &mut Grouper<(String, String, i64)>, out: &Emitter| {
                    summarize_groups(g, out, &mut sizes_by_day, Some(&KEPT_PERCENTILES), upload_size)
                }))
                .writer(truncating(by_day_summary.clone())),
        )
        .stage(
            PipelineStage::new("RekeyStatsByReceivedTimestamp", stats.clone())
                .transform(map_fn(rekey_stats_by_received_timestamp))
                .writer(truncating(with_received.clone())),
        )
        .stage(
            PipelineStage::new("ComputeInterarrivalTimes", with_received.clone())
                .transform(group_fn(compute_interarrival_times))
                .writer(truncating(interarrival.clone())),
        )
        .stage(
            PipelineStage::new("SummarizeInterarrival", interarrival.clone())
                .transform(group_fn(move |g: &mut Grouper<(String, String)>, out: &Emitter| {
                    summarize_groups(g, out, &mut gaps, None, |record: &GroupRecord| {
                        let (gap, _filename): (i64, String) = record.decode_suffix()?;
                        Ok(gap)
                    })
                }))
                .writer(truncating(interarrival_summary.clone())),
        )
        .stage(
            PipelineStage::new("SummarizeSizesPerDay", stats)
                .transform(group_fn(summarize_sizes_per_day))
                .writer(truncating(sizes_per_day.clone())),
        )
        .stage(
            PipelineStage::new("AggregateExperimentsPerDay", sizes_per_day.clone())
                .transform(stream_fn(aggregate_sizes_per_day))
                .writer(sizes_per_day_merge),
        )
        .stages(sinks.csv_stage("WriteSizesSummary", size_summary, "sizes.csv", coarse.0.clone(), coarse.1.clone()))
        .stages(sinks.csv_stage("WriteSizesSummaryByHour", by_hour_summary, "sizes-by-hour.csv", fine.0.clone(), fine.1.clone()))
        .stages(sinks.csv_stage("WriteSizesSummaryByDay", by_day_summary, "sizes-by-day.csv", fine.0, fine.1))
        .stages(sinks.csv_stage(
            "WriteInterarrivalTimesSummary",
            interarrival_summary,
            "interarrival-times.csv",
            coarse.0,
            coarse.1,
        ))
        .stages(sinks.csv_stage(
            "WriteSizePerDaySummary",
            sizes_per_day,
            "sizes-per-day.csv",
            vec![
                Column::str("experiment"),
                Column::str("node"),
                Column::int("timestamp"),
            ],
            vec![Column::int("size")],
        ))
        .delete_after(with_hour)
        .delete_after(with_day)
        .delete_after(with_received)
        .delete_after(interarrival))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decode_ints;
    use crate::pipeline::{apply, run_pipeline, PipelineOptions};
    use crate::store::read_all;
    use crate::time::{SECONDS_PER_DAY, SECONDS_PER_HOUR};
    use crate::uploads::test_support::manager_with_stats;
    use tempfile::TempDir;

    #[test]
    fn test_ordinals() {
        let rendered: Vec<String> = [0, 1, 2, 3, 4, 11, 12, 13, 21, 22, 95, 100, 101, 111]
            .into_iter()
            .map(ordinal)
            .collect();
        assert_eq!(
            rendered,
            vec![
                "0th", "1st", "2nd", "3rd", "4th", "11th", "12th", "13th", "21st", "22nd", "95th", "100th",
                "101st", "111th"
            ]
        );
    }

    #[test]
    fn test_interarrival_skips_first_upload() {
        let input = vec![
            Record::key_only(encode(&("active", "OW1", 100i64, "a"))),
            Record::key_only(encode(&("active", "OW1", 160i64, "b"))),
            Record::key_only(encode(&("active", "OW1", 400i64, "c"))),
            Record::key_only(encode(&("active", "OW2", 50i64, "d"))),
        ];
        let output = apply(group_fn(compute_interarrival_times).as_mut(), input).unwrap();
        let gaps: Vec<(String, String, i64, String)> = output.iter().map(|r| decode(&r.key).unwrap()).collect();
        assert_eq!(
            gaps,
            vec![
                ("active".into(), "OW1".into(), 60, "b".into()),
                ("active".into(), "OW1".into(), 240, "c".into()),
            ]
        );
    }

    #[test]
    fn test_aggregate_adds_all_experiments() {
        let record = |exp: &str, node: &str, day: i64, size: i64| {
            Record::new(encode(&(exp, node, day)), encode(&size))
        };
        let input = vec![
            record("active", "OW1", 0, 10),
            record("all", "OW1", 0, 999),
            record("passive", "OW1", 0, 5),
            record("passive", "OW2", 0, 7),
        ];
        let output = apply(stream_fn(aggregate_sizes_per_day).as_mut(), input).unwrap();
        let totals: Vec<((String, String, i64), i64)> = output
            .iter()
            .map(|r| (decode(&r.key).unwrap(), decode(&r.value).unwrap()))
            .collect();
        assert_eq!(
            totals,
            vec![
                (("all".into(), "OW1".into(), 0), 15),
                (("all".into(), "OW2".into(), 0), 7),
            ]
        );
    }

    #[tokio::test]
    async fn test_summarize_pipeline() {
        let day = 15_500 * SECONDS_PER_DAY;
        let manager = manager_with_stats(&[
            ("active", "OW1", "a", day + 10, -1, 100),
            ("active", "OW1", "b", day + 70, -1, 300),
            ("active", "OW1", "c", day + SECONDS_PER_HOUR, -1, 200),
            ("passive", "OW1", "d", day + 5, -1, 1000),
        ]);
        let dir = TempDir::new().unwrap();
        run_pipeline(
            summarize_pipeline(&manager, &Sinks::none().with_csv(dir.path())).unwrap(),
            &PipelineOptions::default(),
        )
        .await
        .unwrap();

        let summary = read_all(manager.open(SIZE_SUMMARY).unwrap().as_ref()).unwrap();
        assert_eq!(summary.len(), 2);
        let active = decode_ints(&summary[0].value).unwrap();
        assert_eq!(active.len(), 1 + COARSE_SAMPLE);
        assert_eq!(active[0], 3);
        assert_eq!(active[1], 100);
        assert_eq!(active[COARSE_SAMPLE], 300);

        let by_hour = read_all(manager.open(SIZE_SUMMARY_BY_HOUR).unwrap().as_ref()).unwrap();
        assert_eq!(by_hour.len(), 3);
        assert_eq!(decode_ints(&by_hour[0].value).unwrap().len(), 1 + KEPT_PERCENTILES.len());

        let gaps = read_all(manager.open(INTERARRIVAL_TIMES_SUMMARY).unwrap().as_ref()).unwrap();
        // A node with a single upload has no gaps and so no summary row.
        assert_eq!(gaps.len(), 1);
        let active_gaps = decode_ints(&gaps[0].value).unwrap();
        assert_eq!((active_gaps[0], active_gaps[1], active_gaps[COARSE_SAMPLE]), (2, 60, 3530));

        let per_day = std::fs::read_to_string(dir.path().join("sizes-per-day.csv")).unwrap();
        assert_eq!(
            per_day,
            format!(
                "experiment,node,timestamp,size\nactive,OW1,{day},600\nall,OW1,{day},1600\npassive,OW1,{day},1000\n"
            )
        );
        let header = std::fs::read_to_string(dir.path().join("sizes-by-day.csv")).unwrap();
        assert!(header.starts_with(
            "experiment,node,timestamp,count,0th,1st,5th,10th,25th,50th,75th,90th,95th,99th,100th\n"
        ));

        for intermediate in [STATS_WITH_HOUR, STATS_WITH_DAY, STATS_WITH_RECEIVED_TIMESTAMP, INTERARRIVAL_TIMES] {
            assert!(read_all(manager.open(intermediate).unwrap().as_ref()).unwrap().is_empty());
        }
    }
}
