//! Fan-in and fan-out over several stores.

use std::sync::Arc;

use super::merge::{MergeMode, MergingIter};
use super::{Record, RecordIter, StoreReader, StoreWriter, WriteMode, WriteSession};
use crate::error::{FleetError, Result};

/// Merges several sorted readers into one sorted stream.
///
/// Every record's `origin` is set to the index of the reader it came from.
/// Records with equal keys are all kept, lower indexes first, so a grouping
/// transform sees each key once per input that holds it.
#[derive(Debug, Clone)]
pub struct DemuxingReader {
    name: String,
    readers: Vec<Arc<dyn StoreReader>>,
}

impl DemuxingReader {
    pub fn new(readers: Vec<Arc<dyn StoreReader>>) -> Self {
        let name = readers
            .iter()
            .map(|r| r.name())
            .collect::<Vec<_>>()
            .join("+");
        Self { name, readers }
    }
}

impl StoreReader for DemuxingReader {
    fn name(&self) -> &str {
        &self.name
    }

    fn scan(&self) -> Result<RecordIter> {
        let sources = self
            .readers
            .iter()
            .map(|reader| reader.scan())
            .collect::<Result<Vec<_>>>()?;
        Ok(Box::new(MergingIter::new(sources, MergeMode::KeepAll)))
    }
}

/// Routes each record to the writer at index `record.origin`.
///
/// Sessions are committed in declaration order, so a ledger store listed last
/// only gains its entries after the data they vouch for is durable.
#[derive(Debug, Clone)]
pub struct MuxingWriter {
    name: String,
    writers: Vec<Arc<dyn StoreWriter>>,
}

impl MuxingWriter {
    pub fn new(writers: Vec<Arc<dyn StoreWriter>>) -> Self {
        let name = writers
            .iter()
            .map(|w| w.name())
            .collect::<Vec<_>>()
            .join("+");
        Self { name, writers }
    }
}

impl StoreWriter for MuxingWriter {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&self) -> Result<Box<dyn WriteSession>> {
        let sessions = self
            .writers
            .iter()
            .map(|writer| writer.open())
            .collect::<Result<Vec<_>>>()?;
        Ok(Box::new(MuxingSession {
            name: self.name.clone(),
            sessions,
        }))
    }

    fn open_with(&self, mode: WriteMode) -> Result<Box<dyn WriteSession>> {
        let sessions = self
            .writers
            .iter()
            .map(|writer| writer.open_with(mode))
            .collect::<Result<Vec<_>>>()?;
        Ok(Box::new(MuxingSession {
            name: self.name.clone(),
            sessions,
        }))
    }
}

struct MuxingSession {
    name: String,
    sessions: Vec<Box<dyn WriteSession>>,
}

impl WriteSession for MuxingSession {
    fn write(&mut self, record: Record) -> Result<()> {
        let origin = record.origin;
        let session = self.sessions.get_mut(origin).ok_or_else(|| {
            FleetError::storage(&self.name, format!("no output for origin {origin}"))
        })?;
        session.write(record)
    }

    fn commit(self: Box<Self>) -> Result<()> {
        for session in self.sessions {
            session.commit()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode;
    use crate::store::{read_all, write_all, MemoryStore};

    #[test]
    fn test_demux_tags_origins() {
        let scanned = MemoryStore::new("tarnames");
        let indexed = MemoryStore::new("tarnames-indexed");
        write_all(
            scanned.as_ref(),
            [Record::key_only(encode("/a")), Record::key_only(encode("/b"))],
        )
        .unwrap();
        write_all(indexed.as_ref(), [Record::key_only(encode("/a"))]).unwrap();

        let demux = DemuxingReader::new(vec![scanned, indexed]);
        assert_eq!(demux.name(), "tarnames+tarnames-indexed");
        let tagged: Vec<(Vec<u8>, usize)> = read_all(&demux)
            .unwrap()
            .into_iter()
            .map(|r| (r.key, r.origin))
            .collect();
        assert_eq!(
            tagged,
            vec![(encode("/a"), 0), (encode("/a"), 1), (encode("/b"), 0)]
        );
    }

    #[test]
    fn test_mux_routes_by_origin_and_rejects_unknown() {
        let logs = MemoryStore::new("logs");
        let markers = MemoryStore::new("markers");
        let mux = MuxingWriter::new(vec![logs.clone(), markers.clone()]);

        let mut session = mux.open().unwrap();
        session
            .write(Record::new(encode("log"), b"body".to_vec()))
            .unwrap();
        session
            .write(Record::key_only(encode("/a.tar.gz")).with_origin(1))
            .unwrap();
        assert!(session
            .write(Record::key_only(encode("x")).with_origin(2))
            .is_err());
        session.commit().unwrap();

        assert_eq!(logs.len(), 1);
        assert_eq!(markers.len(), 1);
    }
}
