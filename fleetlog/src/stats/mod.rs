//! Streaming statistics used by the derived pipelines.

pub mod intervals;
pub mod reboots;
pub mod sampler;

pub use intervals::{coalesce, coalesce_by_node, merge_intervals, Interval, IntervalBuilder};
pub use reboots::RebootTracker;
pub use sampler::QuantileSample;
