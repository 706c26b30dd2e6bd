//! In-memory record stores.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::{Arc, Mutex, RwLock};

use super::{
    Record, RecordIter, StoreDeleter, StoreManager, StoreReader, StoreSeeker, StoreWriter,
    WriteMode, WriteSession,
};
use crate::error::{FleetError, Result};

type Map = BTreeMap<Vec<u8>, Vec<u8>>;

/// A store held in a shared ordered map.
#[derive(Debug)]
pub struct MemoryStore {
    name: String,
    data: Arc<RwLock<Map>>,
}

impl MemoryStore {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            data: Arc::new(RwLock::new(Map::new())),
        })
    }

    /// Number of records currently committed.
    pub fn len(&self) -> usize {
        self.data.read().map(|map| map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot_range(&self, start: Bound<Vec<u8>>, prefix: Option<&[u8]>) -> Result<RecordIter> {
        let map = self
            .data
            .read()
            .map_err(|_| FleetError::storage(&self.name, "lock poisoned"))?;
        let records: Vec<Result<Record>> = map
            .range((start, Bound::Unbounded))
            .take_while(|(key, _)| prefix.map_or(true, |p| key.starts_with(p)))
            .map(|(key, value)| Ok(Record::new(key.clone(), value.clone())))
            .collect();
        Ok(Box::new(records.into_iter()))
    }
}

impl StoreReader for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn scan(&self) -> Result<RecordIter> {
        self.snapshot_range(Bound::Unbounded, None)
    }
}

impl StoreSeeker for MemoryStore {
    fn seek(&self, prefix: &[u8]) -> Result<RecordIter> {
        self.snapshot_range(Bound::Included(prefix.to_vec()), Some(prefix))
    }
}

impl StoreWriter for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn open_with(&self, mode: WriteMode) -> Result<Box<dyn WriteSession>> {
        Ok(Box::new(MemorySession {
            name: self.name.clone(),
            target: Arc::clone(&self.data),
            pending: Map::new(),
            mode,
        }))
    }
}

impl StoreDeleter for MemoryStore {
    fn delete(&self) -> Result<()> {
        let mut map = self
            .data
            .write()
            .map_err(|_| FleetError::storage(&self.name, "lock poisoned"))?;
        map.clear();
        Ok(())
    }
}

struct MemorySession {
    name: String,
    target: Arc<RwLock<Map>>,
    pending: Map,
    mode: WriteMode,
}

impl WriteSession for MemorySession {
    fn write(&mut self, record: Record) -> Result<()> {
        self.pending.insert(record.key, record.value);
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<()> {
        let MemorySession {
            name,
            target,
            pending,
            mode,
        } = *self;
        let mut map = target
            .write()
            .map_err(|_| FleetError::storage(&name, "lock poisoned"))?;
        match mode {
            WriteMode::Truncate => *map = pending,
            WriteMode::Upsert => map.extend(pending),
        }
        Ok(())
    }
}

/// Hands out one shared [`MemoryStore`] per name.
#[derive(Debug, Default, Clone)]
pub struct MemoryManager {
    stores: Arc<Mutex<HashMap<String, Arc<MemoryStore>>>>,
}

impl MemoryManager {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StoreManager for MemoryManager {
    type Store = MemoryStore;

    fn open(&self, name: &str) -> Result<Arc<MemoryStore>> {
        let mut stores = self
            .stores
            .lock()
            .map_err(|_| FleetError::storage(name, "manager lock poisoned"))?;
        Ok(Arc::clone(
            stores
                .entry(name.to_string())
                .or_insert_with(|| MemoryStore::new(name)),
        ))
    }
}
