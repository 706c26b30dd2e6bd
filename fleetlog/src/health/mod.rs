//! Pipelines over health logs.
//!
//! The health indexer fills the `logs` store with one record per log file of
//! each health run, keyed by [`LogKey`]. Every pipeline here reads one or two
//! log kinds out of that store, extracts a small time series, and writes it to
//! a derived store that is rebuilt on each run. CSV and SQLite exports are
//! added when the corresponding [`Sinks`] are configured.

use std::borrow::Cow;
use std::path::Path;
use std::sync::Arc;

use crate::codec::decode;
use crate::error::Result;
use crate::indexer::{index_tarballs_pipeline, HealthLogs};
use crate::keys::LogKey;
use crate::metrics::SharedMetrics;
use crate::pipeline::Pipeline;
use crate::sinks::Sinks;
use crate::store::{read_only_some_logs, Record, StoreManager, StoreReader};

pub mod devices;
pub mod filesystem;
pub mod iproute;
pub mod memory;
pub mod packages;
pub mod reboots;
pub mod summarize;
pub mod uptime;

pub use devices::devices_count_pipeline;
pub use filesystem::filesystem_usage_pipeline;
pub use iproute::ip_route_pipeline;
pub use memory::memory_usage_pipeline;
pub use packages::packages_pipeline;
pub use reboots::reboots_pipeline;
pub use summarize::summarize_health_pipeline;
pub use uptime::uptime_pipeline;

/// Store holding raw health logs.
pub const LOGS: &str = "logs";

/// Indexes health tarballs under `tarballs_path` into [`LOGS`].
pub fn index_pipeline<M: StoreManager>(
    manager: &M,
    tarballs_path: &Path,
    metrics: SharedMetrics,
) -> Result<Pipeline> {
    index_tarballs_pipeline(manager, Arc::new(HealthLogs), tarballs_path, metrics)
}

/// Every derived health pipeline, in an order where each reads only stores
/// that earlier stages have already rebuilt.
pub fn all_pipelines<M: StoreManager>(manager: &M, sinks: &Sinks) -> Result<Pipeline> {
    let mut pipeline = uptime_pipeline(manager, sinks)?;
    pipeline.extend(reboots_pipeline(manager, sinks)?);
    pipeline.extend(memory_usage_pipeline(manager, sinks)?);
    pipeline.extend(filesystem_usage_pipeline(manager, sinks)?);
    pipeline.extend(packages_pipeline(manager, sinks)?);
    pipeline.extend(ip_route_pipeline(manager, sinks)?);
    pipeline.extend(devices_count_pipeline(manager)?);
    pipeline.extend(summarize_health_pipeline(manager, sinks)?);
    Ok(pipeline)
}

/// Reads only the given log kinds out of [`LOGS`].
fn logs_of_kind<M: StoreManager>(manager: &M, kinds: &[&str]) -> Result<Arc<dyn StoreReader>> {
    Ok(read_only_some_logs(manager.seeker(LOGS)?, kinds))
}

/// Splits a raw log record into its key and text.
fn read_log(record: &Record) -> Result<(LogKey, Cow<'_, str>)> {
    let key: LogKey = decode(&record.key)?;
    Ok((key, String::from_utf8_lossy(&record.value)))
}
