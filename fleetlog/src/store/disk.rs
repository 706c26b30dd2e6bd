//! Directory-backed record stores built from immutable sorted runs.
//!
//! Each named store is a directory of `run-NNNNNNNN.sst` files (see
//! [`run_file`](super::run_file)). Readers merge every run, letting the run
//! with the highest sequence number win on equal keys.
//!
//! A write session sorts incoming records in a memtable and spills it to a
//! private staging directory when it grows past `memtable_bytes`. At commit the
//! staged runs are merged into one file, which then becomes visible with a
//! single rename:
//!
//! - `Upsert` renames it into the store as the next run.
//! - `Truncate` places it in a fresh `.<name>.next` directory and swaps that
//!   directory in for the old one. An interrupted swap is finished (or rolled
//!   back) the next time the store is opened.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use super::merge::{MergeMode, MergingIter};
use super::run_file::{RunReader, RunWriter};
use super::{
    Record, RecordIter, StoreDeleter, StoreManager, StoreReader, StoreSeeker, StoreWriter,
    WriteMode, WriteSession,
};
use crate::config::StorageConfig;
use crate::error::{FleetError, Result};

const STAGING_DIR: &str = ".staging";

static SESSION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Sizing knobs shared by every store of a manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskOptions {
    pub memtable_bytes: usize,
    pub index_interval: usize,
}

impl Default for DiskOptions {
    fn default() -> Self {
        let config = StorageConfig::default();
        Self {
            memtable_bytes: config.memtable_bytes,
            index_interval: config.index_interval,
        }
    }
}

impl From<&StorageConfig> for DiskOptions {
    fn from(config: &StorageConfig) -> Self {
        Self {
            memtable_bytes: config.memtable_bytes,
            index_interval: config.index_interval,
        }
    }
}

/// Opens [`DiskStore`]s under one root directory.
#[derive(Debug, Clone)]
pub struct DiskManager {
    root: PathBuf,
    options: DiskOptions,
}

impl DiskManager {
    /// Creates the root directory if needed.
    pub fn new(root: impl Into<PathBuf>, options: DiskOptions) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|err| {
            FleetError::storage_with_source(
                root.display().to_string(),
                "cannot create store root",
                Box::new(err),
            )
        })?;
        Ok(Self { root, options })
    }

    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        Self::new(config.root.clone(), DiskOptions::from(config))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Rewrites the named store as a single run.
    pub fn compact(&self, name: &str) -> Result<()> {
        self.open(name)?.compact()
    }
}

impl StoreManager for DiskManager {
    type Store = DiskStore;

    fn open(&self, name: &str) -> Result<Arc<DiskStore>> {
        DiskStore::open_in(&self.root, name, self.options).map(Arc::new)
    }
}

/// One named store on disk.
#[derive(Debug)]
pub struct DiskStore {
    name: String,
    root: PathBuf,
    dir: PathBuf,
    options: DiskOptions,
}

impl DiskStore {
    pub fn open_in(root: &Path, name: &str, options: DiskOptions) -> Result<Self> {
        if name.is_empty() || name.starts_with('.') || name.contains(['/', '\\']) {
            return Err(FleetError::storage(name, "invalid store name"));
        }
        let store = Self {
            name: name.to_string(),
            root: root.to_path_buf(),
            dir: root.join(name),
            options,
        };
        store.recover()?;
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn next_dir(&self) -> PathBuf {
        self.root.join(format!(".{}.next", self.name))
    }

    fn old_dir(&self) -> PathBuf {
        self.root.join(format!(".{}.old", self.name))
    }

    /// Completes or discards a truncate swap that was cut short.
    fn recover(&self) -> Result<()> {
        let next = self.next_dir();
        let old = self.old_dir();
        if next.exists() {
            if self.dir.exists() {
                debug!(store = %self.name, "discarding unfinished truncate");
                fs::remove_dir_all(&next)?;
            } else {
                warn!(store = %self.name, "finishing interrupted truncate swap");
                fs::rename(&next, &self.dir)?;
            }
        }
        if old.exists() {
            fs::remove_dir_all(&old)?;
        }
        Ok(())
    }

    /// Run files in ascending sequence order.
    pub fn runs(&self) -> Result<Vec<(u64, PathBuf)>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut runs = Vec::new();
        for entry in entries {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(seq) = file_name
                .to_str()
                .and_then(|n| n.strip_prefix("run-"))
                .and_then(|n| n.strip_suffix(".sst"))
                .and_then(|n| n.parse::<u64>().ok())
            else {
                continue;
            };
            runs.push((seq, entry.path()));
        }
        runs.sort();
        Ok(runs)
    }

    fn open_runs(&self) -> Result<Vec<RunReader>> {
        self.runs()?
            .into_iter()
            .map(|(_, path)| RunReader::open(path))
            .collect()
    }

    fn merged(&self, sources: Vec<RecordIter>) -> RecordIter {
        if sources.len() == 1 {
            if let Some(only) = sources.into_iter().next() {
                return only;
            }
            return Box::new(std::iter::empty());
        }
        Box::new(MergingIter::new(sources, MergeMode::NewestWins))
    }

    fn staging_dir(&self) -> PathBuf {
        let session = SESSION_COUNTER.fetch_add(1, Ordering::Relaxed);
        self.root.join(STAGING_DIR).join(format!(
            "{}-{}-{}",
            self.name,
            std::process::id(),
            session
        ))
    }

    /// Makes `run` (or nothing, for an empty session) the store's contents
    /// according to `mode`.
    fn install(&self, run: Option<PathBuf>, mode: WriteMode) -> Result<()> {
        match mode {
            WriteMode::Upsert => {
                let Some(run) = run else {
                    return Ok(());
                };
                fs::create_dir_all(&self.dir)?;
                let seq = self.runs()?.last().map_or(1, |(seq, _)| seq + 1);
                fs::rename(&run, self.dir.join(run_name(seq)))?;
                sync_dir(&self.dir);
            }
            WriteMode::Truncate => {
                let next = self.next_dir();
                if next.exists() {
                    fs::remove_dir_all(&next)?;
                }
                fs::create_dir_all(&next)?;
                if let Some(run) = run {
                    fs::rename(&run, next.join(run_name(1)))?;
                }
                sync_dir(&next);

                let old = self.old_dir();
                if self.dir.exists() {
                    fs::rename(&self.dir, &old)?;
                }
                fs::rename(&next, &self.dir)?;
                sync_dir(&self.root);
                if old.exists() {
                    fs::remove_dir_all(&old)?;
                }
            }
        }
        Ok(())
    }

    /// Rewrites every run into a single run.
    #[instrument(skip(self), fields(store = %self.name))]
    pub fn compact(&self) -> Result<()> {
        let runs = self.runs()?;
        if runs.len() <= 1 {
            debug!(runs = runs.len(), "nothing to compact");
            return Ok(());
        }
        let staging = self.staging_dir();
        fs::create_dir_all(&staging)?;
        let result = (|| {
            let inputs: Vec<PathBuf> = runs.iter().map(|(_, path)| path.clone()).collect();
            let merged = merge_run_files(&self.name, &inputs, &staging.join("compacted.sst"), self.options)?;
            self.install(Some(merged), WriteMode::Truncate)
        })();
        let _ = fs::remove_dir_all(&staging);
        if result.is_ok() {
            info!(runs = runs.len(), "compacted store");
        }
        result
    }
}

fn run_name(seq: u64) -> String {
    format!("run-{seq:08}.sst")
}

fn sync_dir(dir: &Path) {
    if let Ok(handle) = File::open(dir) {
        let _ = handle.sync_all();
    }
}

/// Merges run files (oldest first) into one run at `output`.
fn merge_run_files(
    store: &str,
    inputs: &[PathBuf],
    output: &Path,
    options: DiskOptions,
) -> Result<PathBuf> {
    let sources = inputs
        .iter()
        .map(|path| RunReader::open(path.clone())?.scan())
        .collect::<Result<Vec<_>>>()?;
    let mut writer = RunWriter::create(store, output, options.index_interval)?;
    for record in MergingIter::new(sources, MergeMode::NewestWins) {
        let record = record?;
        writer.append(&record.key, &record.value)?;
    }
    writer.finish()
}

impl StoreReader for DiskStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn scan(&self) -> Result<RecordIter> {
        let sources = self
            .open_runs()?
            .iter()
            .map(RunReader::scan)
            .collect::<Result<Vec<_>>>()?;
        Ok(self.merged(sources))
    }
}

impl StoreSeeker for DiskStore {
    fn seek(&self, prefix: &[u8]) -> Result<RecordIter> {
        let sources = self
            .open_runs()?
            .iter()
            .map(|run| run.seek(prefix))
            .collect::<Result<Vec<_>>>()?;
        Ok(self.merged(sources))
    }
}

impl StoreWriter for DiskStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn open_with(&self, mode: WriteMode) -> Result<Box<dyn WriteSession>> {
        Ok(Box::new(DiskSession {
            store: DiskStore {
                name: self.name.clone(),
                root: self.root.clone(),
                dir: self.dir.clone(),
                options: self.options,
            },
            mode,
            staging: self.staging_dir(),
            memtable: BTreeMap::new(),
            memtable_bytes: 0,
            spilled: Vec::new(),
            written: 0,
        }))
    }
}

impl StoreDeleter for DiskStore {
    fn delete(&self) -> Result<()> {
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => {
                debug!(store = %self.name, "deleted store");
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(FleetError::storage_with_source(
                &self.name,
                "cannot delete store",
                Box::new(err),
            )),
        }
    }
}

struct DiskSession {
    store: DiskStore,
    mode: WriteMode,
    staging: PathBuf,
    memtable: BTreeMap<Vec<u8>, Vec<u8>>,
    memtable_bytes: usize,
    spilled: Vec<PathBuf>,
    written: u64,
}

impl DiskSession {
    fn spill(&mut self) -> Result<()> {
        if self.memtable.is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.staging)?;
        let path = self
            .staging
            .join(format!("pending-{:06}.sst", self.spilled.len()));
        let mut writer =
            RunWriter::create(&self.store.name, &path, self.store.options.index_interval)?;
        for (key, value) in std::mem::take(&mut self.memtable) {
            writer.append(&key, &value)?;
        }
        self.spilled.push(writer.finish()?);
        debug!(
            store = %self.store.name,
            bytes = self.memtable_bytes,
            runs = self.spilled.len(),
            "spilled memtable"
        );
        self.memtable_bytes = 0;
        Ok(())
    }

    fn finish_run(&mut self) -> Result<Option<PathBuf>> {
        self.spill()?;
        match self.spilled.len() {
            0 => Ok(None),
            1 => Ok(self.spilled.pop()),
            _ => {
                let output = self.staging.join("merged.sst");
                let merged = merge_run_files(
                    &self.store.name,
                    &self.spilled,
                    &output,
                    self.store.options,
                )?;
                Ok(Some(merged))
            }
        }
    }
}

impl WriteSession for DiskSession {
    fn write(&mut self, record: Record) -> Result<()> {
        let key_len = record.key.len();
        let value_len = record.value.len();
        match self.memtable.insert(record.key, record.value) {
            Some(previous) => {
                self.memtable_bytes = self.memtable_bytes.saturating_sub(previous.len()) + value_len;
            }
            None => self.memtable_bytes += key_len + value_len,
        }
        self.written += 1;
        if self.memtable_bytes >= self.store.options.memtable_bytes {
            self.spill()?;
        }
        Ok(())
    }

    fn commit(mut self: Box<Self>) -> Result<()> {
        let run = self.finish_run()?;
        self.store.install(run, self.mode)?;
        debug!(
            store = %self.store.name,
            records = self.written,
            mode = ?self.mode,
            "committed write session"
        );
        Ok(())
    }
}

impl Drop for DiskSession {
    fn drop(&mut self) {
        if self.staging.exists() {
            let _ = fs::remove_dir_all(&self.staging);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode;
    use crate::store::{read_all, write_all};
    use tempfile::TempDir;

    fn small_options() -> DiskOptions {
        DiskOptions {
            memtable_bytes: 64,
            index_interval: 2,
        }
    }

    fn record(key: &str, value: &str) -> Record {
        Record::new(encode(key), value.as_bytes().to_vec())
    }

    fn contents(store: &DiskStore) -> Vec<(String, String)> {
        read_all(store)
            .unwrap()
            .into_iter()
            .map(|r| {
                (
                    crate::codec::decode::<String>(&r.key).unwrap(),
                    String::from_utf8(r.value).unwrap(),
                )
            })
            .collect()
    }

    #[test]
    fn test_missing_store_reads_empty() {
        let dir = TempDir::new().unwrap();
        let manager = DiskManager::new(dir.path(), small_options()).unwrap();
        let store = manager.open("logs").unwrap();
        assert!(contents(&store).is_empty());
        assert_eq!(store.seek(&encode("x")).unwrap().count(), 0);
    }

    #[test]
    fn test_upsert_merges_and_newest_wins() {
        let dir = TempDir::new().unwrap();
        let manager = DiskManager::new(dir.path(), small_options()).unwrap();
        let store = manager.open("logs").unwrap();

        write_all(store.as_ref(), [record("a", "1"), record("c", "1")]).unwrap();
        write_all(store.as_ref(), [record("a", "2"), record("b", "2")]).unwrap();

        assert_eq!(store.runs().unwrap().len(), 2);
        assert_eq!(
            contents(&store),
            vec![
                ("a".into(), "2".into()),
                ("b".into(), "2".into()),
                ("c".into(), "1".into())
            ]
        );
    }

    #[test]
    fn test_spilled_session_commits_as_one_run() {
        let dir = TempDir::new().unwrap();
        let manager = DiskManager::new(dir.path(), small_options()).unwrap();
        let store = manager.open("logs").unwrap();

        let records: Vec<Record> = (0..50)
            .rev()
            .map(|i| record(&format!("key-{i:03}"), "some value"))
            .collect();
        write_all(store.as_ref(), records).unwrap();

        assert_eq!(store.runs().unwrap().len(), 1);
        let stored = contents(&store);
        assert_eq!(stored.len(), 50);
        assert_eq!(stored[0].0, "key-000");
        assert!(!dir.path().join(STAGING_DIR).read_dir().unwrap().any(|_| true));
    }

    #[test]
    fn test_truncate_replaces_and_preserves_open_scan() {
        let dir = TempDir::new().unwrap();
        let manager = DiskManager::new(dir.path(), small_options()).unwrap();
        let store = manager.open("derived").unwrap();
        write_all(store.as_ref(), [record("old", "x")]).unwrap();

        let before = store.scan().unwrap();
        let mut session = store.open_with(WriteMode::Truncate).unwrap();
        session.write(record("new", "y")).unwrap();
        session.commit().unwrap();

        assert_eq!(before.count(), 1);
        assert_eq!(contents(&store), vec![("new".into(), "y".into())]);
        assert!(!dir.path().join(".derived.old").exists());
    }

    #[test]
    fn test_dropped_session_leaves_no_trace() {
        let dir = TempDir::new().unwrap();
        let manager = DiskManager::new(dir.path(), small_options()).unwrap();
        let store = manager.open("logs").unwrap();
        {
            let mut session = store.open().unwrap();
            for i in 0..20 {
                session.write(record(&format!("k{i}"), "value")).unwrap();
            }
        }
        assert!(contents(&store).is_empty());
    }

    #[test]
    fn test_recover_finishes_interrupted_swap() {
        let dir = TempDir::new().unwrap();
        let manager = DiskManager::new(dir.path(), small_options()).unwrap();
        let store = manager.open("derived").unwrap();
        write_all(store.as_ref(), [record("kept", "1")]).unwrap();

        // Simulate a crash between the two renames of a truncate swap.
        fs::rename(store.dir(), dir.path().join(".derived.next")).unwrap();
        let reopened = manager.open("derived").unwrap();
        assert_eq!(contents(&reopened), vec![("kept".into(), "1".into())]);
    }

    #[test]
    fn test_compact_keeps_contents() {
        let dir = TempDir::new().unwrap();
        let manager = DiskManager::new(dir.path(), small_options()).unwrap();
        let store = manager.open("logs").unwrap();
        for i in 0..4 {
            write_all(store.as_ref(), [record("shared", &i.to_string()), record(&format!("k{i}"), "v")]).unwrap();
        }
        let before = contents(&store);
        manager.compact("logs").unwrap();
        assert_eq!(store.runs().unwrap().len(), 1);
        assert_eq!(contents(&store), before);
        assert!(before.contains(&("shared".into(), "3".into())));
    }

    #[test]
    fn test_delete_and_invalid_names() {
        let dir = TempDir::new().unwrap();
        let manager = DiskManager::new(dir.path(), small_options()).unwrap();
        let store = manager.open("logs").unwrap();
        write_all(store.as_ref(), [record("a", "1")]).unwrap();
        store.delete().unwrap();
        assert!(contents(&store).is_empty());
        store.delete().unwrap();

        assert!(manager.open("../escape").is_err());
        assert!(manager.open(".hidden").is_err());
    }
}
