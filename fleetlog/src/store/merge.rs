//! K-way merge of sorted record streams.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use super::{Record, RecordIter};
use crate::error::Result;

/// What to do when several inputs hold the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    /// Emit only the record from the highest-indexed input.
    NewestWins,
    /// Emit every record, lower-indexed inputs first, tagging `origin` with
    /// the input index.
    KeepAll,
}

struct HeapEntry {
    record: Record,
    source: usize,
}

impl HeapEntry {
    fn rank(&self) -> (&[u8], Reverse<usize>) {
        (self.record.key.as_slice(), Reverse(self.source))
    }
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    // BinaryHeap is a max-heap; invert so the smallest key pops first. Among
    // equal keys, NewestWins wants the highest source first and KeepAll the
    // lowest; `MergingIter` flips the source for KeepAll.
    fn cmp(&self, other: &Self) -> Ordering {
        other.rank().cmp(&self.rank())
    }
}

/// Merges inputs that are each sorted by key into one sorted stream.
pub struct MergingIter {
    sources: Vec<RecordIter>,
    heap: BinaryHeap<HeapEntry>,
    mode: MergeMode,
    primed: bool,
    failed: bool,
}

impl MergingIter {
    /// `sources` are ordered oldest first.
    pub fn new(sources: Vec<RecordIter>, mode: MergeMode) -> Self {
        Self {
            heap: BinaryHeap::with_capacity(sources.len()),
            sources,
            mode,
            primed: false,
            failed: false,
        }
    }

    fn heap_source(&self, source: usize) -> usize {
        match self.mode {
            MergeMode::NewestWins => source,
            // Reverse so the lowest input index pops first among equal keys.
            MergeMode::KeepAll => self.sources.len() - 1 - source,
        }
    }

    fn source_index(&self, heap_source: usize) -> usize {
        match self.mode {
            MergeMode::NewestWins => heap_source,
            MergeMode::KeepAll => self.sources.len() - 1 - heap_source,
        }
    }

    fn refill(&mut self, source: usize) -> Result<()> {
        if let Some(next) = self.sources[source].next() {
            let record = next?;
            let heap_source = self.heap_source(source);
            self.heap.push(HeapEntry {
                record,
                source: heap_source,
            });
        }
        Ok(())
    }

    fn prime(&mut self) -> Result<()> {
        for source in 0..self.sources.len() {
            self.refill(source)?;
        }
        self.primed = true;
        Ok(())
    }

    fn advance(&mut self) -> Result<Option<Record>> {
        if !self.primed {
            self.prime()?;
        }
        let Some(entry) = self.heap.pop() else {
            return Ok(None);
        };
        let source = self.source_index(entry.source);
        self.refill(source)?;
        let mut record = entry.record;
        match self.mode {
            MergeMode::KeepAll => record.origin = source,
            MergeMode::NewestWins => {
                record.origin = 0;
                while self
                    .heap
                    .peek()
                    .is_some_and(|top| top.record.key == record.key)
                {
                    if let Some(shadowed) = self.heap.pop() {
                        let shadowed_source = self.source_index(shadowed.source);
                        self.refill(shadowed_source)?;
                    }
                }
            }
        }
        Ok(Some(record))
    }
}

impl Iterator for MergingIter {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.advance() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => None,
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(keys: &[(&str, &str)]) -> RecordIter {
        let records: Vec<Result<Record>> = keys
            .iter()
            .map(|(k, v)| Ok(Record::new(k.as_bytes().to_vec(), v.as_bytes().to_vec())))
            .collect();
        Box::new(records.into_iter())
    }

    #[test]
    fn test_newest_wins_on_equal_keys() {
        let merged: Vec<Record> = MergingIter::new(
            vec![
                source(&[("a", "old"), ("c", "old")]),
                source(&[("a", "new"), ("b", "new")]),
            ],
            MergeMode::NewestWins,
        )
        .collect::<Result<_>>()
        .unwrap();

        let pairs: Vec<_> = merged
            .iter()
            .map(|r| (r.key.clone(), r.value.clone()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                (b"a".to_vec(), b"new".to_vec()),
                (b"b".to_vec(), b"new".to_vec()),
                (b"c".to_vec(), b"old".to_vec()),
            ]
        );
    }

    #[test]
    fn test_keep_all_tags_origin_in_input_order() {
        let merged: Vec<Record> = MergingIter::new(
            vec![source(&[("p", ""), ("q", "")]), source(&[("p", "")])],
            MergeMode::KeepAll,
        )
        .collect::<Result<_>>()
        .unwrap();

        let tagged: Vec<_> = merged.iter().map(|r| (r.key.clone(), r.origin)).collect();
        assert_eq!(
            tagged,
            vec![(b"p".to_vec(), 0), (b"p".to_vec(), 1), (b"q".to_vec(), 0)]
        );
    }

    #[test]
    fn test_error_ends_stream() {
        let failing: RecordIter = Box::new(
            vec![Err(crate::error::FleetError::ChannelClosed)].into_iter(),
        );
        let mut merged = MergingIter::new(vec![failing], MergeMode::NewestWins);
        assert!(merged.next().unwrap().is_err());
        assert!(merged.next().is_none());
    }
}
