//! Pipelines of read → transform → write stages.
//!
//! A [`Pipeline`] is an ordered list of [`PipelineStage`]s. Each stage reads one
//! store from start to end, passes every record through its [`Transform`], and
//! writes what comes out through one write session. The three steps run as
//! separate blocking tasks joined by bounded channels, so a slow writer holds
//! the reader back instead of buffering the whole input.
//!
//! A stage commits its write session only when the reader, the transform, and
//! the writer all finished cleanly; otherwise the session is dropped and the
//! target store keeps its previous contents. Stages run in order and a failed
//! stage ends the pipeline. Stores registered for cleanup are deleted after the
//! last stage succeeds.
//!
//! ```rust
//! use fleetlog::codec::{decode, encode};
//! use fleetlog::pipeline::{map_fn, run_pipeline, Pipeline, PipelineOptions, PipelineStage};
//! use fleetlog::store::{read_all, write_all, MemoryStore, Record};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let source = MemoryStore::new("numbers");
//! let target = MemoryStore::new("doubled");
//! write_all(source.as_ref(), (1..=3i64).map(|n| Record::key_only(encode(&n)))).unwrap();
//!
//! let stage = PipelineStage::new("Double", source)
//!     .transform(map_fn(|record: Record| {
//!         let n: i64 = decode(&record.key)?;
//!         Ok(Some(Record::key_only(encode(&(n * 2)))))
//!     }))
//!     .writer(target.clone());
//! run_pipeline(Pipeline::new().stage(stage), &PipelineOptions::default()).await.unwrap();
//!
//! assert_eq!(read_all(target.as_ref()).unwrap().len(), 3);
//! # }
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join3;
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tracing::{debug, info, instrument, warn};

use crate::config::FleetConfig;
use crate::error::{FleetError, Result};
use crate::logging::LogConfig;
use crate::store::{Record, StoreDeleter, StoreReader, StoreWriter, WriteSession};

pub mod grouper;
pub mod transform;

pub use grouper::{GroupRecord, Grouper};
pub use transform::{
    apply, do_fn, group_fn, map_fn, stream_fn, Emitter, RecordBuffer, RecordStream, Transform,
};

/// One read → transform → write step.
pub struct PipelineStage {
    name: String,
    reader: Arc<dyn StoreReader>,
    transform: Option<Box<dyn Transform>>,
    writer: Option<Arc<dyn StoreWriter>>,
}

impl PipelineStage {
    /// A stage that copies `reader` unchanged and discards the output until a
    /// transform and a writer are attached.
    pub fn new(name: impl Into<String>, reader: Arc<dyn StoreReader>) -> Self {
        Self {
            name: name.into(),
            reader,
            transform: None,
            writer: None,
        }
    }

    pub fn transform(mut self, transform: Box<dyn Transform>) -> Self {
        self.transform = Some(transform);
        self
    }

    pub fn writer(mut self, writer: Arc<dyn StoreWriter>) -> Self {
        self.writer = Some(writer);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineStage")
            .field("name", &self.name)
            .field("reader", &self.reader.name())
            .field("transform", &self.transform.is_some())
            .field("writer", &self.writer.as_ref().map(|w| w.name().to_string()))
            .finish()
    }
}

/// An ordered list of stages plus the stores to drop once they all succeed.
#[derive(Debug, Default)]
pub struct Pipeline {
    stages: Vec<PipelineStage>,
    cleanup: Vec<Arc<dyn StoreDeleter>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(mut self, stage: PipelineStage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn push(&mut self, stage: PipelineStage) {
        self.stages.push(stage);
    }

    /// Appends zero or more stages; handy with optional sink stages.
    pub fn stages(mut self, stages: impl IntoIterator<Item = PipelineStage>) -> Self {
        self.stages.extend(stages);
        self
    }

    /// Deletes `store` after the last stage commits. Used for intermediate
    /// stores that only exist to feed later stages.
    pub fn delete_after(mut self, store: Arc<dyn StoreDeleter>) -> Self {
        self.cleanup.push(store);
        self
    }

    /// Appends the stages and cleanup of `other`.
    pub fn extend(&mut self, other: Pipeline) {
        self.stages.extend(other.stages);
        self.cleanup.extend(other.cleanup);
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

/// Engine settings.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Capacity of each stage channel, in records
    pub channel_capacity: usize,
    pub log: LogConfig,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
            log: LogConfig::default(),
        }
    }
}

impl From<&FleetConfig> for PipelineOptions {
    fn from(config: &FleetConfig) -> Self {
        Self {
            channel_capacity: config.pipeline.channel_capacity,
            log: LogConfig {
                log_stage_counts: config.pipeline.log_stage_counts,
                ..LogConfig::default()
            },
        }
    }
}

impl PipelineOptions {
    pub fn with_log(mut self, log: LogConfig) -> Self {
        self.log = log;
        self
    }
}

/// What one stage did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageReport {
    pub name: String,
    pub records_read: u64,
    pub records_written: u64,
    pub elapsed: Duration,
}

/// What a whole pipeline did, stage by stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineReport {
    pub stages: Vec<StageReport>,
}

impl PipelineReport {
    pub fn stage(&self, name: &str) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.name == name)
    }
}

/// Runs every stage in order, then deletes the cleanup stores.
#[instrument(skip_all, fields(stages = pipeline.stages.len()))]
pub async fn run_pipeline(pipeline: Pipeline, options: &PipelineOptions) -> Result<PipelineReport> {
    let mut report = PipelineReport::default();
    for stage in pipeline.stages {
        let name = stage.name.clone();
        let stage_report = match run_stage(stage, options).await {
            Ok(report) => report,
            Err(err) => {
                warn!(stage = %name, error = %err, "stage failed, nothing committed");
                return Err(err);
            }
        };
        if options.log.log_stage_counts {
            info!(
                stage = %stage_report.name,
                read = stage_report.records_read,
                written = stage_report.records_written,
                elapsed_ms = stage_report.elapsed.as_millis() as u64,
                "stage committed"
            );
        }
        report.stages.push(stage_report);
    }

    for store in pipeline.cleanup {
        debug!(store = ?store, "deleting intermediate store");
        let deleted = tokio::task::spawn_blocking(move || store.delete())
            .await
            .map_err(join_error)?;
        deleted?;
    }
    Ok(report)
}

async fn run_stage(stage: PipelineStage, options: &PipelineOptions) -> Result<StageReport> {
    let started = Instant::now();
    let PipelineStage {
        name,
        reader,
        transform,
        writer,
    } = stage;
    debug!(stage = %name, reader = %reader.name(), "starting stage");

    let capacity = options.channel_capacity.max(1);
    let log = options.log.clone();
    let (input_tx, input_rx) = mpsc::channel::<Record>(capacity);
    let (output_tx, output_rx) = mpsc::channel::<Record>(capacity);

    let read_task = tokio::task::spawn_blocking(move || -> Result<u64> {
        let mut read = 0;
        for record in reader.scan()? {
            if input_tx.blocking_send(record?).is_err() {
                // The transform stopped early; its own result decides the stage.
                break;
            }
            read += 1;
        }
        Ok(read)
    });

    let transform_task = tokio::task::spawn_blocking(move || -> Result<()> {
        let input = RecordStream::from_channel(input_rx);
        let output = Emitter::from_channel(output_tx).with_log(log);
        match transform {
            Some(mut transform) => transform.run(input, &output),
            None => input.into_iter().try_for_each(|record| output.emit(record)),
        }
    });

    let write_task = tokio::task::spawn_blocking(
        move || -> Result<(Option<Box<dyn WriteSession>>, u64)> {
            let mut session = writer.map(|w| w.open()).transpose()?;
            let mut output_rx = output_rx;
            let mut written = 0;
            while let Some(record) = output_rx.blocking_recv() {
                if let Some(session) = session.as_mut() {
                    session.write(record)?;
                }
                written += 1;
            }
            Ok((session, written))
        },
    );

    let (read, transformed, written) = join3(read_task, transform_task, write_task).await;
    let read = read.map_err(join_error).and_then(|r| r);
    let transformed = transformed.map_err(join_error).and_then(|r| r);
    let written = written.map_err(join_error).and_then(|r| r);

    match (read, transformed, written) {
        (Ok(records_read), Ok(()), Ok((session, records_written))) => {
            if let Some(session) = session {
                session
                    .commit()
                    .map_err(|err| FleetError::stage_failed(&name, err))?;
            }
            Ok(StageReport {
                name,
                records_read,
                records_written,
                elapsed: started.elapsed(),
            })
        }
        (read, transformed, written) => {
            let errors: Vec<FleetError> = [read.err(), transformed.err(), written.err()]
                .into_iter()
                .flatten()
                .collect();
            Err(FleetError::stage_failed(&name, first_cause(errors)))
        }
    }
}

/// Picks the error that explains a failure: a hang-up is only ever a
/// consequence of some other task failing.
fn first_cause(errors: Vec<FleetError>) -> FleetError {
    let mut fallback = None;
    for err in errors {
        if !err.is_channel_closed() {
            return err;
        }
        fallback.get_or_insert(err);
    }
    fallback.unwrap_or_else(|| FleetError::Internal("stage failed without an error".to_string()))
}

fn join_error(err: JoinError) -> FleetError {
    FleetError::Internal(format!("stage task did not complete: {err}"))
}
