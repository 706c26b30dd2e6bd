//! Transforms: the middle step of a stage.
//!
//! A transform consumes the stage's sorted input as a [`RecordStream`] and
//! emits records through an [`Emitter`]. Most transforms are built from a
//! closure with one of the adapters:
//!
//! - [`map_fn`]: one record in, at most one record out
//! - [`do_fn`]: one record in, any number out
//! - [`group_fn`]: the input partitioned by a decoded key prefix
//! - [`stream_fn`]: the raw stream, for anything else

use std::marker::PhantomData;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use super::grouper::Grouper;
use crate::codec::KeyDecode;
use crate::error::{FleetError, Result};
use crate::logging::LogConfig;
use crate::store::Record;

/// The sorted input of a transform.
pub struct RecordStream {
    inner: Box<dyn Iterator<Item = Record> + Send>,
}

impl RecordStream {
    /// Receives from a stage channel. Blocking; call only from a blocking task.
    pub fn from_channel(mut rx: mpsc::Receiver<Record>) -> Self {
        Self {
            inner: Box::new(std::iter::from_fn(move || rx.blocking_recv())),
        }
    }

    pub fn from_records(records: Vec<Record>) -> Self {
        Self {
            inner: Box::new(records.into_iter()),
        }
    }
}

impl Iterator for RecordStream {
    type Item = Record;

    fn next(&mut self) -> Option<Record> {
        self.inner.next()
    }
}

enum Outlet {
    Channel(mpsc::Sender<Record>),
    Buffer(Arc<Mutex<Vec<Record>>>),
}

/// Where a transform sends its output.
pub struct Emitter {
    outlet: Outlet,
    log: LogConfig,
}

impl Emitter {
    /// Sends into a stage channel, blocking while the writer is behind.
    pub fn from_channel(tx: mpsc::Sender<Record>) -> Self {
        Self {
            outlet: Outlet::Channel(tx),
            log: LogConfig::default(),
        }
    }

    /// Collects into memory; see [`apply`].
    pub fn buffer() -> (Self, RecordBuffer) {
        let records = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                outlet: Outlet::Buffer(Arc::clone(&records)),
                log: LogConfig::default(),
            },
            RecordBuffer { records },
        )
    }

    /// Applies the engine's logging switches to the transform using this emitter.
    pub fn with_log(mut self, log: LogConfig) -> Self {
        self.log = log;
        self
    }

    pub fn log(&self) -> &LogConfig {
        &self.log
    }

    pub fn emit(&self, record: Record) -> Result<()> {
        match &self.outlet {
            Outlet::Channel(tx) => tx
                .blocking_send(record)
                .map_err(|_| FleetError::ChannelClosed),
            Outlet::Buffer(records) => {
                records
                    .lock()
                    .map_err(|_| FleetError::Internal("emit buffer poisoned".to_string()))?
                    .push(record);
                Ok(())
            }
        }
    }

    /// Emits with `origin` set, for stages whose writer is a
    /// [`MuxingWriter`](crate::store::MuxingWriter).
    pub fn emit_to(&self, origin: usize, record: Record) -> Result<()> {
        self.emit(record.with_origin(origin))
    }
}

/// Output captured by [`Emitter::buffer`].
#[derive(Debug, Clone)]
pub struct RecordBuffer {
    records: Arc<Mutex<Vec<Record>>>,
}

impl RecordBuffer {
    pub fn take(&self) -> Vec<Record> {
        match self.records.lock() {
            Ok(mut records) => std::mem::take(&mut *records),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

/// The transform step of a pipeline stage.
pub trait Transform: Send {
    fn run(&mut self, input: RecordStream, output: &Emitter) -> Result<()>;
}

/// Runs a transform over in-memory records and returns what it emitted.
pub fn apply(transform: &mut dyn Transform, input: Vec<Record>) -> Result<Vec<Record>> {
    let (emitter, buffer) = Emitter::buffer();
    transform.run(RecordStream::from_records(input), &emitter)?;
    Ok(buffer.take())
}

struct MapTransform<F>(F);

impl<F> Transform for MapTransform<F>
where
    F: FnMut(Record) -> Result<Option<Record>> + Send,
{
    fn run(&mut self, input: RecordStream, output: &Emitter) -> Result<()> {
        for record in input {
            if let Some(mapped) = (self.0)(record)? {
                output.emit(mapped)?;
            }
        }
        Ok(())
    }
}

/// Applies `f` to each record; `None` drops it.
pub fn map_fn<F>(f: F) -> Box<dyn Transform>
where
    F: FnMut(Record) -> Result<Option<Record>> + Send + 'static,
{
    Box::new(MapTransform(f))
}

struct DoTransform<F>(F);

impl<F> Transform for DoTransform<F>
where
    F: FnMut(Record, &Emitter) -> Result<()> + Send,
{
    fn run(&mut self, input: RecordStream, output: &Emitter) -> Result<()> {
        for record in input {
            (self.0)(record, output)?;
        }
        Ok(())
    }
}

/// Calls `f` once per record; it may emit any number of records.
pub fn do_fn<F>(f: F) -> Box<dyn Transform>
where
    F: FnMut(Record, &Emitter) -> Result<()> + Send + 'static,
{
    Box::new(DoTransform(f))
}

struct GroupTransform<P, F> {
    f: F,
    _prefix: PhantomData<fn() -> P>,
}

impl<P, F> Transform for GroupTransform<P, F>
where
    P: KeyDecode,
    F: FnMut(&mut Grouper<P>, &Emitter) -> Result<()> + Send,
{
    fn run(&mut self, input: RecordStream, output: &Emitter) -> Result<()> {
        let mut grouper = Grouper::new(input);
        (self.f)(&mut grouper, output)
    }
}

/// Hands `f` a [`Grouper`] that partitions the input by the key prefix `P`.
pub fn group_fn<P, F>(f: F) -> Box<dyn Transform>
where
    P: KeyDecode + 'static,
    F: FnMut(&mut Grouper<P>, &Emitter) -> Result<()> + Send + 'static,
{
    Box::new(GroupTransform {
        f,
        _prefix: PhantomData,
    })
}

struct StreamTransform<F>(F);

impl<F> Transform for StreamTransform<F>
where
    F: FnMut(RecordStream, &Emitter) -> Result<()> + Send,
{
    fn run(&mut self, input: RecordStream, output: &Emitter) -> Result<()> {
        (self.0)(input, output)
    }
}

/// Hands `f` the whole input stream.
pub fn stream_fn<F>(f: F) -> Box<dyn Transform>
where
    F: FnMut(RecordStream, &Emitter) -> Result<()> + Send + 'static,
{
    Box::new(StreamTransform(f))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode, encode};

    fn int_records(values: &[i64]) -> Vec<Record> {
        values.iter().map(|v| Record::key_only(encode(v))).collect()
    }

    #[test]
    fn test_map_drops_none() {
        let mut evens = map_fn(|record: Record| {
            let value: i64 = decode(&record.key)?;
            Ok((value % 2 == 0).then_some(record))
        });
        let out = apply(evens.as_mut(), int_records(&[1, 2, 3, 4])).unwrap();
        assert_eq!(out, int_records(&[2, 4]));
    }

    #[test]
    fn test_do_emits_many() {
        let mut twice = do_fn(|record: Record, out: &Emitter| {
            out.emit(record.clone())?;
            out.emit_to(1, record)
        });
        let out = apply(twice.as_mut(), int_records(&[7])).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].origin, 1);
    }

    #[test]
    fn test_errors_propagate() {
        let mut failing = map_fn(|record: Record| decode::<String>(&record.key).map(|_| None));
        assert!(apply(failing.as_mut(), int_records(&[1])).is_err());
    }

    #[test]
    fn test_channel_emitter_reports_closed_receiver() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let emitter = Emitter::from_channel(tx);
        assert!(matches!(
            emitter.emit(Record::default()),
            Err(FleetError::ChannelClosed)
        ));
    }

    #[test]
    fn test_stream_fn_sees_everything() {
        let mut count = stream_fn(|input: RecordStream, out: &Emitter| {
            let n = input.count() as i64;
            out.emit(Record::key_only(encode(&n)))
        });
        let out = apply(count.as_mut(), int_records(&[5, 6, 7])).unwrap();
        assert_eq!(out, int_records(&[3]));
    }
}
