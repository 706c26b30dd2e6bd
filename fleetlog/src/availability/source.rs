//! Where node sightings come from.

use std::sync::Arc;

use crate::codec::{decode, encode};
use crate::error::Result;
use crate::keys::LogKey;
use crate::pipeline::{map_fn, Pipeline, PipelineStage};
use crate::store::{read_only_some_logs, truncating, Record, StoreManager, StoreSeeker};
use crate::time::{truncate_to_day, SECONDS_PER_DAY};

/// Store of `(day, node, timestamp)` keys, one per sighting.
pub const SIGHTINGS: &str = "sightings";

/// A time-ordered feed of `(node, timestamp)` sightings.
pub trait SightingSource: Send + Sync {
    /// Sightings of one UTC day, starting at `day_start`. Each node's
    /// sightings come in time order.
    fn sightings_on(&self, day_start: i64) -> Result<Vec<(String, i64)>>;
}

/// Sightings held in memory.
#[derive(Debug, Clone, Default)]
pub struct VecSightings {
    sightings: Vec<(String, i64)>,
}

impl VecSightings {
    pub fn new(mut sightings: Vec<(String, i64)>) -> Self {
        sightings.sort_by_key(|(_, at)| *at);
        Self { sightings }
    }
}

impl SightingSource for VecSightings {
    fn sightings_on(&self, day_start: i64) -> Result<Vec<(String, i64)>> {
        let end = day_start + SECONDS_PER_DAY;
        Ok(self
            .sightings
            .iter()
            .filter(|(_, at)| (day_start..end).contains(at))
            .cloned()
            .collect())
    }
}

/// Sightings read from the [`SIGHTINGS`] store, one prefix seek per day.
#[derive(Debug, Clone)]
pub struct StoreSightings {
    store: Arc<dyn StoreSeeker>,
}

impl StoreSightings {
    pub fn new(store: Arc<dyn StoreSeeker>) -> Self {
        Self { store }
    }
}

impl SightingSource for StoreSightings {
    fn sightings_on(&self, day_start: i64) -> Result<Vec<(String, i64)>> {
        self.store
            .seek(&encode(&day_start))?
            .map(|record| {
                let (_day, node, at): (i64, String, i64) = decode(&record?.key)?;
                Ok((node, at))
            })
            .collect()
    }
}

/// `LogKey` → `(day, node, timestamp)`: every log of the given kind counts as
/// a sighting of its node.
pub fn log_to_sighting(record: Record) -> Result<Option<Record>> {
    let key: LogKey = decode(&record.key)?;
    Ok(Some(Record::key_only(encode(&(
        truncate_to_day(key.timestamp),
        key.node,
        key.timestamp,
    )))))
}

/// Rebuilds [`SIGHTINGS`] from the `kinds` logs of the `logs` store.
pub fn extract_sightings_pipeline<M: StoreManager>(manager: &M, kinds: &[&str]) -> Result<Pipeline> {
    let logs = read_only_some_logs(manager.seeker("logs")?, kinds);
    Ok(Pipeline::new().stage(
        PipelineStage::new("ExtractSightings", logs)
            .transform(map_fn(log_to_sighting))
            .writer(truncating(manager.writer(SIGHTINGS)?)),
    ))
}
