//! Prefix-filtered views of a store.

use std::sync::Arc;

use super::{RecordIter, StoreReader, StoreSeeker};
use crate::codec::encode;
use crate::error::Result;

/// Reads the union of several key prefixes of one store, in key order.
///
/// Prefixes are sorted and any prefix that extends another is dropped, so the
/// concatenated seeks stay sorted and never repeat a record.
#[derive(Debug, Clone)]
pub struct PrefixReader {
    name: String,
    seeker: Arc<dyn StoreSeeker>,
    prefixes: Vec<Vec<u8>>,
}

impl PrefixReader {
    pub fn new(seeker: Arc<dyn StoreSeeker>, mut prefixes: Vec<Vec<u8>>) -> Self {
        prefixes.sort();
        prefixes.dedup();
        let mut kept: Vec<Vec<u8>> = Vec::with_capacity(prefixes.len());
        for prefix in prefixes {
            if kept.last().is_some_and(|p| prefix.starts_with(p)) {
                continue;
            }
            kept.push(prefix);
        }
        Self {
            name: format!("{}[{} prefixes]", seeker.name(), kept.len()),
            seeker,
            prefixes: kept,
        }
    }
}

impl StoreReader for PrefixReader {
    fn name(&self) -> &str {
        &self.name
    }

    fn scan(&self) -> Result<RecordIter> {
        let scans = self
            .prefixes
            .iter()
            .map(|prefix| self.seeker.seek(prefix))
            .collect::<Result<Vec<_>>>()?;
        Ok(Box::new(scans.into_iter().flatten()))
    }
}

/// Reads only the log records of the given kinds from a `logs` store.
pub fn read_only_some_logs(logs: Arc<dyn StoreSeeker>, kinds: &[&str]) -> Arc<dyn StoreReader> {
    let prefixes = kinds.iter().map(|kind| encode(*kind)).collect();
    Arc::new(PrefixReader::new(logs, prefixes))
}
