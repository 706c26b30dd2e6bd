//! Typed keys and values of the primary stores.

use crate::codec::{KeyDecode, KeyEncode};
use crate::error::Result;

/// Key of the `logs` store: one log file of one node at one time.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LogKey {
    /// Log type, e.g. `uptime` or `df`
    pub kind: String,
    pub node: String,
    /// Unix seconds, UTC
    pub timestamp: i64,
}

impl LogKey {
    pub fn new(kind: impl Into<String>, node: impl Into<String>, timestamp: i64) -> Self {
        Self {
            kind: kind.into(),
            node: node.into(),
            timestamp,
        }
    }
}

impl KeyEncode for LogKey {
    fn encode_to(&self, buf: &mut Vec<u8>) {
        self.kind.encode_to(buf);
        self.node.encode_to(buf);
        self.timestamp.encode_to(buf);
    }
}

impl KeyDecode for LogKey {
    fn decode_from(input: &mut &[u8]) -> Result<Self> {
        let (kind, node, timestamp) = <(String, String, i64)>::decode_from(input)?;
        Ok(Self {
            kind,
            node,
            timestamp,
        })
    }
}

/// Key of the `stats` store: one uploaded file.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StatsKey {
    pub experiment: String,
    pub node: String,
    pub filename: String,
}

impl KeyEncode for StatsKey {
    fn encode_to(&self, buf: &mut Vec<u8>) {
        self.experiment.encode_to(buf);
        self.node.encode_to(buf);
        self.filename.encode_to(buf);
    }
}

impl KeyDecode for StatsKey {
    fn decode_from(input: &mut &[u8]) -> Result<Self> {
        let (experiment, node, filename) = <(String, String, String)>::decode_from(input)?;
        Ok(Self {
            experiment,
            node,
            filename,
        })
    }
}

/// Value of the `stats` store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsValue {
    /// When the server received the upload (archive entry mtime)
    pub received: i64,
    /// When the node created the file, or -1 if the name did not say
    pub created: i64,
    pub size: i64,
}

impl KeyEncode for StatsValue {
    fn encode_to(&self, buf: &mut Vec<u8>) {
        self.received.encode_to(buf);
        self.created.encode_to(buf);
        self.size.encode_to(buf);
    }
}

impl KeyDecode for StatsValue {
    fn decode_from(input: &mut &[u8]) -> Result<Self> {
        let (received, created, size) = <(i64, i64, i64)>::decode_from(input)?;
        Ok(Self {
            received,
            created,
            size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode, encode};

    #[test]
    fn test_log_key_matches_tuple_encoding() {
        let key = LogKey::new("uptime", "OW0123456789AB", 61);
        assert_eq!(encode(&key), encode(&("uptime", "OW0123456789AB", 61i64)));
        assert_eq!(decode::<LogKey>(&encode(&key)).unwrap(), key);
    }

    #[test]
    fn test_stats_round_trip() {
        let key = StatsKey {
            experiment: "passive".into(),
            node: "OWC43DC78EE081".into(),
            filename: "OWC43DC78EE081-1372648974516087-3958.gz".into(),
        };
        let value = StatsValue {
            received: 1_372_767_660,
            created: -1,
            size: 134,
        };
        assert_eq!(decode::<StatsKey>(&encode(&key)).unwrap(), key);
        assert_eq!(decode::<StatsValue>(&encode(&value)).unwrap(), value);
    }
}
