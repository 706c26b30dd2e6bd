//! Key-sorted record stores.
//!
//! A store is a named, persistent map from byte keys to byte values whose
//! readers always observe keys in ascending byte order. Stores are exposed as
//! separate capabilities:
//!
//! - [`StoreReader`]: a full sorted scan
//! - [`StoreSeeker`]: a sorted scan bounded to one key prefix
//! - [`StoreWriter`]: a write session, committed atomically
//! - [`StoreDeleter`]: drops the store entirely
//!
//! Write sessions buffer and sort what they receive, and a later write of the
//! same key replaces the earlier one. Reads that started before a commit never
//! observe it, so a stage may read one store and rewrite it in the same run.
//!
//! Two backends implement every capability: [`memory::MemoryStore`] for tests
//! and [`disk::DiskStore`] for production. The remaining modules wrap or
//! combine stores without owning any data.

use std::fmt::Debug;
use std::sync::Arc;

use crate::error::Result;

pub mod csv;
pub mod demux;
pub mod disk;
pub mod glob;
pub mod memory;
pub mod merge;
pub mod prefix;
pub mod run_file;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use self::csv::{csv_line, Column, CsvFileManager, CsvWriter};
pub use demux::{DemuxingReader, MuxingWriter};
pub use disk::{DiskManager, DiskStore};
pub use glob::GlobReader;
pub use memory::{MemoryManager, MemoryStore};
pub use prefix::{read_only_some_logs, PrefixReader};
#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteManager, SqliteWriter};

/// One key/value pair flowing through a pipeline.
///
/// `origin` is transient routing information: a [`DemuxingReader`] sets it to
/// the index of the input a record came from and a [`MuxingWriter`] uses it to
/// pick an output. Stores never persist it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Record {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub origin: usize,
}

impl Record {
    pub fn new(key: Vec<u8>, value: Vec<u8>) -> Self {
        Self {
            key,
            value,
            origin: 0,
        }
    }

    /// A record with an empty value.
    pub fn key_only(key: Vec<u8>) -> Self {
        Self::new(key, Vec::new())
    }

    pub fn with_origin(mut self, origin: usize) -> Self {
        self.origin = origin;
        self
    }

    /// Approximate memory footprint, used for memtable accounting.
    pub fn size(&self) -> usize {
        self.key.len() + self.value.len()
    }
}

/// A sorted stream of records. Errors end the stream.
pub type RecordIter = Box<dyn Iterator<Item = Result<Record>> + Send>;

/// How a write session treats the existing contents at commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Merge into existing contents, replacing equal keys.
    Upsert,
    /// Replace the existing contents entirely.
    Truncate,
}

/// Sequential sorted reads of a whole store.
pub trait StoreReader: Send + Sync + Debug {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// Opens a snapshot scan over every record in key order.
    fn scan(&self) -> Result<RecordIter>;
}

/// Bounded sorted reads over one key prefix.
pub trait StoreSeeker: StoreReader {
    /// Scans the records whose keys start with `prefix`, in key order.
    fn seek(&self, prefix: &[u8]) -> Result<RecordIter>;
}

/// An open write session. Nothing is visible until [`WriteSession::commit`].
pub trait WriteSession: Send {
    fn write(&mut self, record: Record) -> Result<()>;

    /// Makes everything written visible at once. Dropping a session without
    /// committing discards it.
    fn commit(self: Box<Self>) -> Result<()>;
}

/// Produces write sessions.
pub trait StoreWriter: Send + Sync + Debug {
    fn name(&self) -> &str;

    /// Opens a session in the writer's natural mode.
    fn open(&self) -> Result<Box<dyn WriteSession>> {
        self.open_with(WriteMode::Upsert)
    }

    fn open_with(&self, mode: WriteMode) -> Result<Box<dyn WriteSession>>;
}

/// Drops a store and everything in it.
pub trait StoreDeleter: Send + Sync + Debug {
    fn delete(&self) -> Result<()>;
}

/// A backend that offers every capability on one named dataset.
pub trait Store: StoreSeeker + StoreWriter + StoreDeleter {}

impl<T: StoreSeeker + StoreWriter + StoreDeleter> Store for T {}

/// Opens stores by name.
///
/// The capability methods hand out the same underlying store under a narrower
/// interface; callers ask for what a stage needs.
pub trait StoreManager: Send + Sync {
    type Store: Store + 'static;

    /// Opens (creating if needed) the named store with every capability.
    fn open(&self, name: &str) -> Result<Arc<Self::Store>>;

    fn reader(&self, name: &str) -> Result<Arc<dyn StoreReader>> {
        let store: Arc<dyn StoreReader> = self.open(name)?;
        Ok(store)
    }

    fn seeker(&self, name: &str) -> Result<Arc<dyn StoreSeeker>> {
        let store: Arc<dyn StoreSeeker> = self.open(name)?;
        Ok(store)
    }

    fn writer(&self, name: &str) -> Result<Arc<dyn StoreWriter>> {
        let store: Arc<dyn StoreWriter> = self.open(name)?;
        Ok(store)
    }

    fn deleter(&self, name: &str) -> Result<Arc<dyn StoreDeleter>> {
        let store: Arc<dyn StoreDeleter> = self.open(name)?;
        Ok(store)
    }
}

/// Forces every session of the wrapped writer to replace existing contents.
///
/// Derived stores are rebuilt from scratch on each run; wrapping their writer
/// keeps records from earlier runs from surviving a rekey.
#[derive(Debug, Clone)]
pub struct TruncatingWriter {
    inner: Arc<dyn StoreWriter>,
}

impl TruncatingWriter {
    pub fn new(inner: Arc<dyn StoreWriter>) -> Self {
        Self { inner }
    }
}

impl StoreWriter for TruncatingWriter {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn open(&self) -> Result<Box<dyn WriteSession>> {
        self.inner.open_with(WriteMode::Truncate)
    }

    fn open_with(&self, mode: WriteMode) -> Result<Box<dyn WriteSession>> {
        self.inner.open_with(mode)
    }
}

/// Wraps a writer so its sessions truncate. Shorthand for pipeline builders.
pub fn truncating(inner: Arc<dyn StoreWriter>) -> Arc<dyn StoreWriter> {
    Arc::new(TruncatingWriter::new(inner))
}

/// Drains a reader into a vector. Mostly useful in tests and small sinks.
pub fn read_all(reader: &dyn StoreReader) -> Result<Vec<Record>> {
    reader.scan()?.collect()
}

/// Writes `records` through one session and commits it.
pub fn write_all(writer: &dyn StoreWriter, records: impl IntoIterator<Item = Record>) -> Result<()> {
    let mut session = writer.open()?;
    for record in records {
        session.write(record)?;
    }
    session.commit()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode;

    #[test]
    fn test_truncating_writer_replaces_contents() {
        let store = MemoryStore::new("derived");
        write_all(store.as_ref(), [Record::key_only(encode("old"))]).unwrap();

        let writer = truncating(store.clone());
        write_all(writer.as_ref(), [Record::key_only(encode("new"))]).unwrap();

        let keys: Vec<_> = read_all(store.as_ref())
            .unwrap()
            .into_iter()
            .map(|r| r.key)
            .collect();
        assert_eq!(keys, vec![encode("new")]);
    }

    #[test]
    fn test_record_helpers() {
        let record = Record::new(b"k".to_vec(), b"vv".to_vec()).with_origin(1);
        assert_eq!(record.origin, 1);
        assert_eq!(record.size(), 3);
        assert!(Record::key_only(vec![1]).value.is_empty());
    }
}
