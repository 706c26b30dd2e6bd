//! Partitioning a sorted stream into runs that share a key prefix.

use std::marker::PhantomData;

use super::transform::RecordStream;
use crate::codec::{self, KeyDecode};
use crate::error::{FleetError, Result};
use crate::store::Record;

/// One record of the current group.
#[derive(Debug, Clone)]
pub struct GroupRecord {
    pub record: Record,
    prefix_len: usize,
}

impl GroupRecord {
    pub fn key(&self) -> &[u8] {
        &self.record.key
    }

    pub fn value(&self) -> &[u8] {
        &self.record.value
    }

    /// The key bytes after the group prefix.
    pub fn suffix(&self) -> &[u8] {
        &self.record.key[self.prefix_len..]
    }

    /// Decodes the key bytes after the group prefix.
    pub fn decode_suffix<T: KeyDecode>(&self) -> Result<T> {
        codec::decode(self.suffix())
    }

    pub fn into_record(self) -> Record {
        self.record
    }
}

struct Pending {
    record: Record,
    prefix_len: usize,
}

/// Walks a sorted stream group by group.
///
/// Records belong to the same group when their keys start with the same
/// encoded `P`. Groups are compared on raw prefix bytes, so a group is exactly
/// one contiguous run of the sorted input. A key smaller than its predecessor
/// fails with [`FleetError::UnsortedInput`].
///
/// ```rust
/// use fleetlog::codec::encode;
/// use fleetlog::pipeline::{Grouper, RecordStream};
/// use fleetlog::store::Record;
///
/// let records = vec![
///     Record::key_only(encode(&("a", 1i64))),
///     Record::key_only(encode(&("a", 2i64))),
///     Record::key_only(encode(&("b", 1i64))),
/// ];
/// let mut grouper = Grouper::<(String,)>::new(RecordStream::from_records(records));
/// let mut sizes = Vec::new();
/// while let Some((name,)) = grouper.next_group().unwrap() {
///     let mut n = 0;
///     while grouper.next_record().unwrap().is_some() {
///         n += 1;
///     }
///     sizes.push((name, n));
/// }
/// assert_eq!(sizes, vec![("a".to_string(), 2), ("b".to_string(), 1)]);
/// ```
pub struct Grouper<P> {
    input: RecordStream,
    lookahead: Option<Pending>,
    current: Option<Vec<u8>>,
    last_key: Option<Vec<u8>>,
    _prefix: PhantomData<fn() -> P>,
}

impl<P: KeyDecode> Grouper<P> {
    pub fn new(input: RecordStream) -> Self {
        Self {
            input,
            lookahead: None,
            current: None,
            last_key: None,
            _prefix: PhantomData,
        }
    }

    fn pull(&mut self) -> Result<Option<Pending>> {
        if let Some(pending) = self.lookahead.take() {
            return Ok(Some(pending));
        }
        let Some(record) = self.input.next() else {
            return Ok(None);
        };
        if let Some(last) = &self.last_key {
            if record.key < *last {
                return Err(FleetError::unsorted(last, &record.key));
            }
        }
        self.last_key = Some(record.key.clone());
        let prefix_len = codec::prefix_len::<P>(&record.key)?;
        Ok(Some(Pending { record, prefix_len }))
    }

    /// Advances to the next group, skipping whatever is left of the current
    /// one, and returns its decoded prefix. `None` once the input is exhausted.
    pub fn next_group(&mut self) -> Result<Option<P>> {
        while self.next_record()?.is_some() {}
        let Some(pending) = self.pull()? else {
            self.current = None;
            return Ok(None);
        };
        let prefix = pending.record.key[..pending.prefix_len].to_vec();
        let value = codec::decode::<P>(&prefix)?;
        self.current = Some(prefix);
        self.lookahead = Some(pending);
        Ok(Some(value))
    }

    /// The next record of the current group, or `None` at its end.
    pub fn next_record(&mut self) -> Result<Option<GroupRecord>> {
        if self.current.is_none() {
            return Ok(None);
        }
        let Some(pending) = self.pull()? else {
            return Ok(None);
        };
        let same_group = self
            .current
            .as_deref()
            .is_some_and(|prefix| pending.record.key[..pending.prefix_len] == *prefix);
        if same_group {
            Ok(Some(GroupRecord {
                record: pending.record,
                prefix_len: pending.prefix_len,
            }))
        } else {
            self.lookahead = Some(pending);
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode;

    fn grouper(keys: Vec<Vec<u8>>) -> Grouper<(String, String)> {
        Grouper::new(RecordStream::from_records(
            keys.into_iter().map(Record::key_only).collect(),
        ))
    }

    #[test]
    fn test_groups_by_two_field_prefix() {
        let mut g = grouper(vec![
            encode(&("uptime", "a", 1i64)),
            encode(&("uptime", "a", 2i64)),
            encode(&("uptime", "b", 1i64)),
        ]);

        let first = g.next_group().unwrap().unwrap();
        assert_eq!(first, ("uptime".to_string(), "a".to_string()));
        let mut timestamps = Vec::new();
        while let Some(record) = g.next_record().unwrap() {
            timestamps.push(record.decode_suffix::<i64>().unwrap());
        }
        assert_eq!(timestamps, vec![1, 2]);

        let second = g.next_group().unwrap().unwrap();
        assert_eq!(second.1, "b");
        assert!(g.next_record().unwrap().is_some());
        assert!(g.next_record().unwrap().is_none());
        assert!(g.next_group().unwrap().is_none());
    }

    #[test]
    fn test_next_group_skips_unread_records() {
        let mut g = grouper(vec![
            encode(&("k", "a", 1i64)),
            encode(&("k", "a", 2i64)),
            encode(&("k", "c", 1i64)),
        ]);
        g.next_group().unwrap();
        let next = g.next_group().unwrap().unwrap();
        assert_eq!(next.1, "c");
    }

    #[test]
    fn test_empty_input() {
        let mut g = grouper(vec![]);
        assert!(g.next_group().unwrap().is_none());
        assert!(g.next_record().unwrap().is_none());
    }

    #[test]
    fn test_unsorted_input_fails() {
        let mut g = grouper(vec![encode(&("k", "b", 1i64)), encode(&("k", "a", 1i64))]);
        g.next_group().unwrap();
        let err = loop {
            match g.next_group() {
                Ok(Some(_)) => continue,
                Ok(None) => panic!("unsorted input went unnoticed"),
                Err(err) => break err,
            }
        };
        assert!(matches!(err, FleetError::UnsortedInput { .. }));
    }

    #[test]
    fn test_equal_keys_stay_in_one_group() {
        let key = encode(&("k", "a", 1i64));
        let mut g = grouper(vec![key.clone(), key]);
        g.next_group().unwrap();
        assert!(g.next_record().unwrap().is_some());
        assert!(g.next_record().unwrap().is_some());
        assert!(g.next_record().unwrap().is_none());
    }

    #[test]
    fn test_undecodable_prefix_fails() {
        let mut g = grouper(vec![encode(&7i64)]);
        assert!(g.next_group().is_err());
    }
}
