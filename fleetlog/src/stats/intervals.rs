//! Coalescing point observations into availability intervals.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A closed time range `[start, end]`, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Interval {
    pub start: i64,
    pub end: i64,
}

impl Interval {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    pub fn point(at: i64) -> Self {
        Self::new(at, at)
    }
}

/// Single-pass scan over one entity's observations in time order.
///
/// A gap larger than the threshold closes the open interval and starts a new
/// one at the current observation. Gaps up to the threshold extend it.
#[derive(Debug, Clone)]
pub struct IntervalBuilder {
    threshold: i64,
    open: Option<Interval>,
}

impl IntervalBuilder {
    pub fn new(threshold: i64) -> Self {
        Self {
            threshold,
            open: None,
        }
    }

    /// Feeds one observation; returns the interval it closed, if any.
    pub fn observe(&mut self, at: i64) -> Option<Interval> {
        let threshold = self.threshold;
        if let Some(open) = self.open.as_mut() {
            if at - open.end <= threshold {
                open.end = open.end.max(at);
                return None;
            }
        }
        self.open.replace(Interval::point(at))
    }

    /// Flushes the open interval, even a single point.
    pub fn finish(&mut self) -> Option<Interval> {
        self.open.take()
    }
}

/// Coalesces one entity's time-ordered observations.
pub fn coalesce(observations: impl IntoIterator<Item = i64>, threshold: i64) -> Vec<Interval> {
    let mut builder = IntervalBuilder::new(threshold);
    let mut intervals: Vec<Interval> = observations
        .into_iter()
        .filter_map(|at| builder.observe(at))
        .collect();
    intervals.extend(builder.finish());
    intervals
}

/// Coalesces `(node, timestamp)` observations, time-ordered per node.
pub fn coalesce_by_node<S>(
    observations: impl IntoIterator<Item = (S, i64)>,
    threshold: i64,
) -> BTreeMap<String, Vec<Interval>>
where
    S: AsRef<str>,
{
    let mut builders: BTreeMap<String, (IntervalBuilder, Vec<Interval>)> = BTreeMap::new();
    for (node, at) in observations {
        let node = node.as_ref();
        if !builders.contains_key(node) {
            builders.insert(node.to_string(), (IntervalBuilder::new(threshold), Vec::new()));
        }
        if let Some((builder, closed)) = builders.get_mut(node) {
            closed.extend(builder.observe(at));
        }
    }
    builders
        .into_iter()
        .map(|(node, (mut builder, mut closed))| {
            closed.extend(builder.finish());
            (node, closed)
        })
        .collect()
}

/// Merges already-coalesced intervals, sorted by start, whose gap is at most
/// `threshold`. Merging the per-day results of [`coalesce`] gives the same
/// intervals as coalescing all the days' observations at once.
pub fn merge_intervals(intervals: impl IntoIterator<Item = Interval>, threshold: i64) -> Vec<Interval> {
    let mut merged: Vec<Interval> = Vec::new();
    for interval in intervals {
        match merged.last_mut() {
            Some(previous) if interval.start - previous.end <= threshold => {
                previous.end = previous.end.max(interval.end);
            }
            _ => merged.push(interval),
        }
    }
    merged
}
