//! Incremental indexing of uploaded log tarballs.
//!
//! Indexing is two stages over three stores:
//!
//! 1. `ScanLogTarballs` globs the tarball directory into `tarnames`.
//! 2. `ReadLogTarballs` reads `tarnames` and `tarnames-indexed` together. A path
//!    present only in `tarnames` is new: it is opened, every entry is handed to
//!    the [`LogFamily`], and on success the path itself is written to
//!    `tarnames-indexed`. A path present in both has been indexed before and is
//!    skipped.
//!
//! The records of one run and the markers of that run are committed together
//! (records first), so a crash before the commit leaves the tarballs unmarked
//! and the next run reads them again. Records overwrite by key, so reading a
//! tarball twice is harmless.
//!
//! A tarball that cannot be opened, is not gzip, or whose tar stream breaks
//! part way is counted as failed and gets no marker.

use std::fmt::{self, Debug};
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;
use std::sync::Arc;

use flate2::read::GzDecoder;
use tracing::{debug, warn};

use crate::codec::encode;
use crate::error::Result;
use crate::metrics::{MetricsSink, SharedMetrics};
use crate::pipeline::{group_fn, Emitter, Grouper, Pipeline, PipelineStage, Transform};
use crate::store::{
    truncating, DemuxingReader, GlobReader, MuxingWriter, Record, StoreManager, StoreReader,
    StoreWriter,
};

pub mod experiments;
pub mod health;
pub mod uploads;

pub use experiments::ExperimentsManagerLogs;
pub use health::HealthLogs;
pub use uploads::UploadStats;

/// Counter names reported to the [`MetricsSink`].
pub mod counters {
    pub const CURRENT_TAR: &str = "current_tar";
    pub const TAR_BYTES_READ: &str = "tar_bytes_read";
    pub const TARS_FAILED: &str = "tars_failed";
    pub const NESTED_TARS_FAILED: &str = "nested_tars_failed";
    pub const TARS_INDEXED: &str = "tars_indexed";
    pub const NESTED_TARS_INDEXED: &str = "nested_tars_indexed";
    pub const TARS_SKIPPED: &str = "tars_skipped";
    pub const LOGS_FAILED: &str = "logs_failed";
    pub const LOGS_INDEXED: &str = "logs_indexed";
}

use counters::*;

pub const TARNAMES: &str = "tarnames";
pub const TARNAMES_INDEXED: &str = "tarnames-indexed";

const SCANNED: usize = 0;
const INDEXED: usize = 1;
const LOGS_OUTPUT: usize = 0;
const MARKER_OUTPUT: usize = 1;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Header fields of one archive entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryMeta {
    /// Path inside the archive
    pub path: String,
    pub size: u64,
    /// Modification time, Unix seconds
    pub mtime: i64,
}

impl EntryMeta {
    /// The last path component.
    pub fn file_name(&self) -> &str {
        split_path(&self.path).1
    }

    /// Everything before the last path component, without the trailing `/`.
    pub fn dir_name(&self) -> &str {
        split_path(&self.path).0
    }
}

fn split_path(path: &str) -> (&str, &str) {
    path.rsplit_once('/').unwrap_or(("", path))
}

/// What a [`LogFamily`] may do while indexing one entry.
pub struct EntryContext<'a> {
    output: &'a Emitter,
    metrics: &'a dyn MetricsSink,
    tarball: &'a Path,
}

impl<'a> EntryContext<'a> {
    pub fn new(output: &'a Emitter, metrics: &'a dyn MetricsSink, tarball: &'a Path) -> Self {
        Self {
            output,
            metrics,
            tarball,
        }
    }

    /// Emits one indexed record.
    pub fn emit(&self, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        self.output.emit_to(LOGS_OUTPUT, Record::new(key, value))?;
        self.metrics.increment(LOGS_INDEXED);
        Ok(())
    }

    /// Counts an entry that could not be indexed.
    pub fn skip(&self, entry: &str, reason: impl fmt::Display) {
        self.metrics.increment(LOGS_FAILED);
        if self.output.log().log_skipped_items {
            debug!(tarball = %self.tarball.display(), entry, %reason, "skipping entry");
        }
    }

    pub fn metrics(&self) -> &dyn MetricsSink {
        self.metrics
    }

    pub fn tarball(&self) -> &Path {
        self.tarball
    }
}

/// One layout of uploaded tarballs.
pub trait LogFamily: Send + Sync + Debug {
    fn name(&self) -> &str;

    /// Glob, relative to the tarballs root, matching this family's uploads.
    fn tarball_pattern(&self) -> &str;

    /// Store that receives the indexed records.
    fn output_store(&self) -> &str {
        "logs"
    }

    /// Indexes one regular file of the outer archive.
    ///
    /// Problems with the entry itself are counted through
    /// [`EntryContext::skip`]; an `Err` aborts the whole indexing stage.
    fn index_entry(&self, entry: &EntryMeta, contents: &mut dyn Read, ctx: &EntryContext<'_>) -> Result<()>;
}

/// Reads one tarball through `family`. Returns whether it was fully read and
/// should be marked as indexed.
pub fn index_tarball(
    path: &Path,
    family: &dyn LogFamily,
    output: &Emitter,
    metrics: &dyn MetricsSink,
) -> Result<bool> {
    metrics.set_text(CURRENT_TAR, &path.to_string_lossy());
    let failed = |what: &str, err: &dyn fmt::Display| {
        warn!(tarball = %path.display(), error = %err, "error {what}");
        metrics.increment(TARS_FAILED);
        false
    };

    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(err) => return Ok(failed("reading tarball", &err)),
    };
    match file.metadata() {
        Ok(meta) => metrics.add(TAR_BYTES_READ, i64::try_from(meta.len()).unwrap_or(i64::MAX)),
        Err(err) => return Ok(failed("stating tarball", &err)),
    }
    let mut magic = [0u8; 2];
    if let Err(err) = file.read_exact(&mut magic).and_then(|_| file.rewind()) {
        return Ok(failed("unzipping tarball", &err));
    }
    if magic != GZIP_MAGIC {
        return Ok(failed("unzipping tarball", &"not a gzip stream"));
    }

    let mut archive = tar::Archive::new(GzDecoder::new(BufReader::new(file)));
    let entries = match archive.entries() {
        Ok(entries) => entries,
        Err(err) => return Ok(failed("unzipping tarball", &err)),
    };
    let ctx = EntryContext::new(output, metrics, path);
    for entry in entries {
        let mut entry = match entry {
            Ok(entry) => entry,
            Err(err) => return Ok(failed("indexing tarball", &err)),
        };
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
        let header = entry.header();
        let meta = match (header.size(), header.mtime()) {
            (Ok(size), Ok(mtime)) => EntryMeta {
                path: name,
                size,
                mtime: i64::try_from(mtime).unwrap_or(i64::MAX),
            },
            (Err(err), _) | (_, Err(err)) => {
                ctx.skip(&name, err);
                continue;
            }
        };
        family.index_entry(&meta, &mut entry, &ctx)?;
    }
    metrics.increment(TARS_INDEXED);
    Ok(true)
}

/// The grouping transform of `ReadLogTarballs`.
pub fn read_log_tarballs(family: Arc<dyn LogFamily>, metrics: SharedMetrics) -> Box<dyn Transform> {
    group_fn(move |groups: &mut Grouper<(String,)>, out: &Emitter| {
        while let Some((path,)) = groups.next_group()? {
            let mut origins = Vec::with_capacity(2);
            while let Some(record) = groups.next_record()? {
                origins.push(record.record.origin);
            }
            match origins.as_slice() {
                [SCANNED] => {}
                [INDEXED] => continue,
                _ => {
                    metrics.increment(TARS_SKIPPED);
                    continue;
                }
            }
            if index_tarball(Path::new(&path), family.as_ref(), out, metrics.as_ref())? {
                out.emit_to(MARKER_OUTPUT, Record::key_only(encode(&path)))?;
            }
        }
        Ok(())
    })
}

/// Builds the two indexing stages for `family`.
pub fn index_tarballs_pipeline<M: StoreManager>(
    manager: &M,
    family: Arc<dyn LogFamily>,
    tarballs_path: &Path,
    metrics: SharedMetrics,
) -> Result<Pipeline> {
    let pattern = tarballs_path.join(family.tarball_pattern());
    let tarnames = manager.open(TARNAMES)?;
    let indexed = manager.open(TARNAMES_INDEXED)?;
    let output = manager.writer(family.output_store())?;

    let scanned_reader: Arc<dyn StoreReader> = tarnames.clone();
    let indexed_reader: Arc<dyn StoreReader> = indexed.clone();
    let indexed_writer: Arc<dyn StoreWriter> = indexed;
    let glob: Arc<dyn StoreReader> = Arc::new(GlobReader::new(pattern.to_string_lossy()));

    Ok(Pipeline::new()
        .stage(PipelineStage::new("ScanLogTarballs", glob).writer(truncating(tarnames)))
        .stage(
            PipelineStage::new(
                "ReadLogTarballs",
                Arc::new(DemuxingReader::new(vec![scanned_reader, indexed_reader])),
            )
            .transform(read_log_tarballs(family, metrics))
            .writer(Arc::new(MuxingWriter::new(vec![output, indexed_writer]))),
        ))
}
