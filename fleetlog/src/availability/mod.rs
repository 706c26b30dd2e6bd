//! Availability intervals of every node, from the first day of data to today.
//!
//! Each UTC day is coalesced on its own and cached as a JSON file, so a run
//! only rescans the days that changed since the previous run: the first
//! uncached day, the day before it (which may have been cached while still
//! incomplete), and everything after. Today is recomputed on every run and
//! never cached. The per-day results are then concatenated per node and
//! passed through [`merge_intervals`], which joins intervals that straddle
//! midnight.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, info, instrument};

use crate::config::AvailabilityConfig;
use crate::error::{FleetError, Result};
use crate::metrics::MetricsSink;
use crate::stats::{coalesce_by_node, merge_intervals, Interval};
use crate::time::{day_start, to_millis};

pub mod cache;
pub mod source;

pub use cache::{write_atomically, DayCache, DayIntervals};
pub use source::{extract_sightings_pipeline, SightingSource, StoreSightings, VecSightings, SIGHTINGS};

pub mod counters {
    pub const SIGHTINGS_PROCESSED: &str = "sightings_processed";
    pub const INTERVALS_CREATED: &str = "intervals_created";
    pub const DAYS_RECOMPUTED: &str = "days_recomputed";
}

/// Settings of one availability run.
#[derive(Debug, Clone)]
pub struct AvailabilityOptions {
    /// Largest gap between sightings, in seconds, inside one interval
    pub outage_threshold: i64,
    pub cache_dir: PathBuf,
    pub min_date: NaiveDate,
}

impl From<&AvailabilityConfig> for AvailabilityOptions {
    fn from(config: &AvailabilityConfig) -> Self {
        Self {
            outage_threshold: config.outage_threshold_secs,
            cache_dir: config.cache_dir.clone(),
            min_date: config.min_date,
        }
    }
}

/// Merged intervals of every node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Availability {
    pub intervals: BTreeMap<String, Vec<Interval>>,
    /// Unix milliseconds
    pub generated_at: i64,
}

impl Availability {
    /// `[ {node: [[start_ms, ...], [end_ms, ...]]}, generated_at_ms ]`
    pub fn to_json(&self) -> Result<Vec<u8>> {
        let columns: BTreeMap<&str, (Vec<i64>, Vec<i64>)> = self
            .intervals
            .iter()
            .map(|(node, intervals)| {
                let starts = intervals.iter().map(|i| to_millis(i.start)).collect();
                let ends = intervals.iter().map(|i| to_millis(i.end)).collect();
                (node.as_str(), (starts, ends))
            })
            .collect();
        Ok(serde_json::to_vec(&(columns, self.generated_at))?)
    }

    /// Writes [`Availability::to_json`] to `path` through a rename.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        write_atomically(path, &self.to_json()?)
    }
}

fn days(from: NaiveDate, to: NaiveDate) -> impl Iterator<Item = NaiveDate> {
    from.iter_days().take_while(move |day| *day <= to)
}

/// First day that must be recomputed: the day before the first uncached day,
/// or yesterday when every day before today is cached.
pub fn first_day_to_process(cache: &DayCache, min_date: NaiveDate, today: NaiveDate) -> NaiveDate {
    let first_uncached = days(min_date, today)
        .find(|day| !cache.contains(*day))
        .unwrap_or(today);
    first_uncached.pred_opt().unwrap_or(first_uncached).max(min_date)
}

fn process_day(
    source: &dyn SightingSource,
    day: NaiveDate,
    threshold: i64,
    metrics: &dyn MetricsSink,
) -> Result<DayIntervals> {
    let sightings = source.sightings_on(day_start(day))?;
    metrics.add(counters::SIGHTINGS_PROCESSED, sightings.len() as i64);
    let intervals = coalesce_by_node(sightings, threshold);
    metrics.add(
        counters::INTERVALS_CREATED,
        intervals.values().map(|v| v.len() as i64).sum(),
    );
    metrics.increment(counters::DAYS_RECOMPUTED);
    Ok(intervals)
}

/// Brings the cache up to date and assembles the merged intervals.
#[instrument(skip_all, fields(min_date = %options.min_date, cache = %options.cache_dir.display()))]
pub fn compute_availability(
    source: &dyn SightingSource,
    options: &AvailabilityOptions,
    now: DateTime<Utc>,
    metrics: &dyn MetricsSink,
) -> Result<Availability> {
    let today = now.date_naive();
    if options.min_date > today {
        return Err(FleetError::Configuration(format!(
            "min_date {} is in the future",
            options.min_date
        )));
    }
    let cache = DayCache::new(&options.cache_dir);
    let first = first_day_to_process(&cache, options.min_date, today);
    info!(first_day = %first, today = %today, "recomputing availability");

    let mut today_intervals = DayIntervals::new();
    for day in days(first, today) {
        debug!(day = %day, "processing day");
        let intervals = process_day(source, day, options.outage_threshold, metrics)?;
        if day < today {
            cache.store(day, &intervals)?;
        } else {
            today_intervals = intervals;
        }
    }

    let mut concatenated: BTreeMap<String, Vec<Interval>> = BTreeMap::new();
    for day in days(options.min_date, today) {
        let intervals = if day == today {
            std::mem::take(&mut today_intervals)
        } else {
            cache.load(day)?.ok_or_else(|| {
                FleetError::storage(
                    "availability-cache",
                    format!("missing cache file {}", cache.path(day).display()),
                )
            })?
        };
        for (node, node_intervals) in intervals {
            concatenated.entry(node).or_default().extend(node_intervals);
        }
    }

    let intervals = concatenated
        .into_iter()
        .map(|(node, intervals)| (node, merge_intervals(intervals, options.outage_threshold)))
        .collect();
    Ok(Availability {
        intervals,
        generated_at: now.timestamp_millis(),
    })
}
