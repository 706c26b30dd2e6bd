//! Reboot inference from uptime counters.

/// Tracks one node's uptime samples in time order and reports boot times.
///
/// Each sample implies a boot time of `timestamp - uptime`. Within a run of
/// non-decreasing uptimes the latest such estimate drifts with clock jitter, so
/// the maximum is kept. When uptime drops, the run's maximum is reported and a
/// new run starts.
///
/// Boot times before the epoch are reported as computed rather than dropped,
/// so a node whose first sample already carries a long uptime keeps its boot.
/// Estimates saturate at the `i64` range.
///
/// ```rust
/// use fleetlog::stats::RebootTracker;
///
/// let mut tracker = RebootTracker::new();
/// let mut boots: Vec<i64> = [(0, 100), (50, 150), (60, 10), (120, 70)]
///     .into_iter()
///     .filter_map(|(ts, uptime)| tracker.observe(ts, uptime))
///     .collect();
/// assert_eq!(boots, vec![-100]);
/// boots.extend(tracker.finish());
/// assert_eq!(boots, vec![-100, 50]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct RebootTracker {
    last_uptime: Option<i64>,
    max_boot: Option<i64>,
}

impl RebootTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one sample; returns the boot time of the run that just ended.
    pub fn observe(&mut self, timestamp: i64, uptime: i64) -> Option<i64> {
        let ended = match self.last_uptime {
            Some(last) if uptime < last => self.max_boot.take(),
            _ => None,
        };
        let boot = timestamp.saturating_sub(uptime);
        self.max_boot = Some(self.max_boot.map_or(boot, |max| max.max(boot)));
        self.last_uptime = Some(uptime);
        ended
    }

    /// Boot time of the current run; resets the tracker for the next node.
    pub fn finish(&mut self) -> Option<i64> {
        self.last_uptime = None;
        self.max_boot.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keeps_latest_estimate_within_run() {
        let mut tracker = RebootTracker::new();
        assert_eq!(tracker.observe(1000, 100), None);
        assert_eq!(tracker.observe(1100, 199), None);
        assert_eq!(tracker.finish(), Some(901));
    }

    #[test]
    fn test_each_drop_ends_a_run() {
        let mut tracker = RebootTracker::new();
        let samples = [(100, 50), (200, 10), (300, 110), (400, 5)];
        let boots: Vec<i64> = samples
            .into_iter()
            .filter_map(|(ts, up)| tracker.observe(ts, up))
            .collect();
        assert_eq!(boots, vec![50, 190]);
        assert_eq!(tracker.finish(), Some(395));
        assert_eq!(tracker.finish(), None);
    }

    #[test]
    fn test_finish_resets_between_nodes() {
        let mut tracker = RebootTracker::new();
        tracker.observe(0, 1000);
        tracker.finish();
        // A smaller uptime for the next node is not a reboot.
        assert_eq!(tracker.observe(10, 5), None);
    }

    #[test]
    fn test_extreme_uptime_saturates() {
        let mut tracker = RebootTracker::new();
        assert_eq!(tracker.observe(-100, i64::MAX), None);
        assert_eq!(tracker.observe(100, i64::MIN), Some(i64::MIN));
        assert_eq!(tracker.finish(), Some(i64::MAX));
    }
}
