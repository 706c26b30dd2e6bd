//! Prelude for commonly used types and traits in fleetlog.

pub use crate::codec::{KeyDecode, KeyEncode};
pub use crate::config::FleetConfig;
pub use crate::error::{ErrorContext, FleetError, Result};
pub use crate::logging::LogConfig;
pub use crate::metrics::{MetricsRegistry, MetricsSink, NoopMetrics, SharedMetrics};
pub use crate::pipeline::{run_pipeline, Pipeline, PipelineOptions, PipelineReport, PipelineStage};
pub use crate::sinks::Sinks;
pub use crate::store::{
    Record, StoreDeleter, StoreManager, StoreReader, StoreSeeker, StoreWriter,
};
