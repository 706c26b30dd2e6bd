//! Immutable sorted-run files.
//!
//! A run holds records in strictly increasing key order. Runs are written once
//! by [`RunWriter`], never modified, and read back by [`RunReader`].
//!
//! ## File layout
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  Header (8 bytes): magic "FLRN", version u16, reserved   │
//! ├──────────────────────────────────────────────────────────┤
//! │  Record 0: key_len u32 | value_len u32 | key | value |   │
//! │            crc32(key ‖ value) u32                        │
//! │  Record 1 ...                                            │
//! ├──────────────────────────────────────────────────────────┤
//! │  Sparse index: key_len u32 | key | offset u64, one entry │
//! │  for every `index_interval`-th record                    │
//! ├──────────────────────────────────────────────────────────┤
//! │  Footer (32 bytes): record_count u64 | index_offset u64  │
//! │  | index_count u64 | magic | crc32(previous 28) u32      │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! All integers are big-endian.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::{Record, RecordIter};
use crate::error::{FleetError, Result};

pub const RUN_MAGIC: [u8; 4] = *b"FLRN";
pub const RUN_VERSION: u16 = 1;
pub const HEADER_SIZE: u64 = 8;
pub const FOOTER_SIZE: u64 = 32;

/// Upper bound on a single key or value; anything larger is treated as corruption.
const MAX_FIELD_LEN: u32 = 1 << 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RunFooter {
    record_count: u64,
    index_offset: u64,
    index_count: u64,
}

impl RunFooter {
    fn to_bytes(self) -> [u8; FOOTER_SIZE as usize] {
        let mut buf = [0u8; FOOTER_SIZE as usize];
        buf[0..8].copy_from_slice(&self.record_count.to_be_bytes());
        buf[8..16].copy_from_slice(&self.index_offset.to_be_bytes());
        buf[16..24].copy_from_slice(&self.index_count.to_be_bytes());
        buf[24..28].copy_from_slice(&RUN_MAGIC);
        let crc = crc32fast::hash(&buf[0..28]);
        buf[28..32].copy_from_slice(&crc.to_be_bytes());
        buf
    }

    fn from_bytes(path: &Path, buf: &[u8; FOOTER_SIZE as usize]) -> Result<Self> {
        if buf[24..28] != RUN_MAGIC {
            return Err(FleetError::corrupt_run(
                path.display().to_string(),
                "bad footer magic",
            ));
        }
        let expected = read_u32(&buf[28..32]);
        let actual = crc32fast::hash(&buf[0..28]);
        if expected != actual {
            return Err(FleetError::ChecksumMismatch {
                path: path.display().to_string(),
                expected,
                actual,
            });
        }
        Ok(Self {
            record_count: read_u64(&buf[0..8]),
            index_offset: read_u64(&buf[8..16]),
            index_count: read_u64(&buf[16..24]),
        })
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[..4]);
    u32::from_be_bytes(raw)
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[..8]);
    u64::from_be_bytes(raw)
}

fn record_crc(key: &[u8], value: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(key);
    hasher.update(value);
    hasher.finalize()
}

/// Streams records into a new run file.
///
/// Keys must be strictly increasing; a smaller key fails with
/// `OutOfOrderWrite` and an equal key is ignored in favour of the first.
pub struct RunWriter {
    store: String,
    path: PathBuf,
    out: BufWriter<File>,
    offset: u64,
    count: u64,
    index_interval: u64,
    index: Vec<(Vec<u8>, u64)>,
    last_key: Option<Vec<u8>>,
}

impl RunWriter {
    pub fn create(store: &str, path: impl Into<PathBuf>, index_interval: usize) -> Result<Self> {
        let path = path.into();
        let mut out = BufWriter::new(File::create(&path)?);
        out.write_all(&RUN_MAGIC)?;
        out.write_all(&RUN_VERSION.to_be_bytes())?;
        out.write_all(&[0u8; 2])?;
        Ok(Self {
            store: store.to_string(),
            path,
            out,
            offset: HEADER_SIZE,
            count: 0,
            index_interval: index_interval.max(1) as u64,
            index: Vec::new(),
            last_key: None,
        })
    }

    pub fn append(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        if let Some(last) = &self.last_key {
            if key < last.as_slice() {
                return Err(FleetError::out_of_order(&self.store, last, key));
            }
            if key == last.as_slice() {
                return Ok(());
            }
        }
        if self.count % self.index_interval == 0 {
            self.index.push((key.to_vec(), self.offset));
        }
        let key_len = u32::try_from(key.len())
            .map_err(|_| FleetError::storage(&self.store, "key too large"))?;
        let value_len = u32::try_from(value.len())
            .map_err(|_| FleetError::storage(&self.store, "value too large"))?;
        self.out.write_all(&key_len.to_be_bytes())?;
        self.out.write_all(&value_len.to_be_bytes())?;
        self.out.write_all(key)?;
        self.out.write_all(value)?;
        self.out.write_all(&record_crc(key, value).to_be_bytes())?;
        self.offset += 12 + key.len() as u64 + value.len() as u64;
        self.count += 1;
        self.last_key = Some(key.to_vec());
        Ok(())
    }

    pub fn len(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Writes the index and footer and syncs the file to disk.
    pub fn finish(mut self) -> Result<PathBuf> {
        let index_offset = self.offset;
        for (key, offset) in &self.index {
            self.out.write_all(&(key.len() as u32).to_be_bytes())?;
            self.out.write_all(key)?;
            self.out.write_all(&offset.to_be_bytes())?;
        }
        let footer = RunFooter {
            record_count: self.count,
            index_offset,
            index_count: self.index.len() as u64,
        };
        self.out.write_all(&footer.to_bytes())?;
        let file = self
            .out
            .into_inner()
            .map_err(|err| FleetError::Io(err.into_error()))?;
        file.sync_all()?;
        Ok(self.path)
    }
}

/// An opened run: footer and sparse index in memory, records read on demand.
#[derive(Debug)]
pub struct RunReader {
    path: PathBuf,
    record_count: u64,
    data_end: u64,
    index: Vec<(Vec<u8>, u64)>,
}

impl RunReader {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut file = File::open(&path)?;
        let len = file.metadata()?.len();
        if len < HEADER_SIZE + FOOTER_SIZE {
            return Err(FleetError::corrupt_run(
                path.display().to_string(),
                format!("file is only {len} bytes"),
            ));
        }

        let mut header = [0u8; HEADER_SIZE as usize];
        file.read_exact(&mut header)?;
        if header[0..4] != RUN_MAGIC {
            return Err(FleetError::corrupt_run(
                path.display().to_string(),
                "bad header magic",
            ));
        }
        let version = u16::from_be_bytes([header[4], header[5]]);
        if version != RUN_VERSION {
            return Err(FleetError::corrupt_run(
                path.display().to_string(),
                format!("unsupported version {version}"),
            ));
        }

        file.seek(SeekFrom::End(-(FOOTER_SIZE as i64)))?;
        let mut footer_bytes = [0u8; FOOTER_SIZE as usize];
        file.read_exact(&mut footer_bytes)?;
        let footer = RunFooter::from_bytes(&path, &footer_bytes)?;
        if footer.index_offset < HEADER_SIZE || footer.index_offset > len - FOOTER_SIZE {
            return Err(FleetError::corrupt_run(
                path.display().to_string(),
                "index offset out of range",
            ));
        }

        file.seek(SeekFrom::Start(footer.index_offset))?;
        let mut reader = BufReader::new(&file);
        let mut index = Vec::with_capacity(footer.index_count as usize);
        for _ in 0..footer.index_count {
            let mut len_buf = [0u8; 4];
            reader.read_exact(&mut len_buf)?;
            let key_len = u32::from_be_bytes(len_buf);
            if key_len > MAX_FIELD_LEN {
                return Err(FleetError::corrupt_run(
                    path.display().to_string(),
                    "index key too large",
                ));
            }
            let mut key = vec![0u8; key_len as usize];
            reader.read_exact(&mut key)?;
            let mut offset_buf = [0u8; 8];
            reader.read_exact(&mut offset_buf)?;
            index.push((key, u64::from_be_bytes(offset_buf)));
        }

        Ok(Self {
            path,
            record_count: footer.record_count,
            data_end: footer.index_offset,
            index,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record_count(&self) -> u64 {
        self.record_count
    }

    /// Iterates every record.
    pub fn scan(&self) -> Result<RecordIter> {
        self.cursor(HEADER_SIZE, None)
    }

    /// Iterates the records whose keys start with `prefix`.
    pub fn seek(&self, prefix: &[u8]) -> Result<RecordIter> {
        // Start at the last indexed key that sorts before the prefix.
        let slot = self
            .index
            .partition_point(|(key, _)| key.as_slice() < prefix);
        let start = match slot {
            0 => HEADER_SIZE,
            n => self.index[n - 1].1,
        };
        self.cursor(start, Some(prefix.to_vec()))
    }

    fn cursor(&self, start: u64, prefix: Option<Vec<u8>>) -> Result<RecordIter> {
        // Each cursor gets its own descriptor so concurrent cursors never
        // share a file offset.
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(start))?;
        Ok(Box::new(RunCursor {
            path: self.path.clone(),
            reader: BufReader::new(file),
            position: start,
            end: self.data_end,
            prefix,
            done: false,
        }))
    }
}

struct RunCursor {
    path: PathBuf,
    reader: BufReader<File>,
    position: u64,
    end: u64,
    prefix: Option<Vec<u8>>,
    done: bool,
}

impl RunCursor {
    fn read_record(&mut self) -> Result<Record> {
        let mut lens = [0u8; 8];
        self.reader.read_exact(&mut lens)?;
        let key_len = read_u32(&lens[0..4]);
        let value_len = read_u32(&lens[4..8]);
        if key_len > MAX_FIELD_LEN || value_len > MAX_FIELD_LEN {
            return Err(FleetError::corrupt_run(
                self.path.display().to_string(),
                format!("record at offset {} has implausible length", self.position),
            ));
        }
        let mut key = vec![0u8; key_len as usize];
        self.reader.read_exact(&mut key)?;
        let mut value = vec![0u8; value_len as usize];
        self.reader.read_exact(&mut value)?;
        let mut crc_buf = [0u8; 4];
        self.reader.read_exact(&mut crc_buf)?;
        let expected = u32::from_be_bytes(crc_buf);
        let actual = record_crc(&key, &value);
        if expected != actual {
            return Err(FleetError::ChecksumMismatch {
                path: self.path.display().to_string(),
                expected,
                actual,
            });
        }
        self.position += 12 + key_len as u64 + value_len as u64;
        Ok(Record::new(key, value))
    }

    fn advance(&mut self) -> Result<Option<Record>> {
        while self.position < self.end {
            let record = self.read_record()?;
            let Some(prefix) = &self.prefix else {
                return Ok(Some(record));
            };
            if record.key.starts_with(prefix) {
                return Ok(Some(record));
            }
            if record.key.as_slice() > prefix.as_slice() {
                return Ok(None);
            }
        }
        Ok(None)
    }
}

impl Iterator for RunCursor {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.advance() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}
