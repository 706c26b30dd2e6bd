//! Tarball discovery.

use std::path::PathBuf;

use tracing::{debug, warn};

use super::{Record, RecordIter, StoreReader};
use crate::codec::encode;
use crate::error::Result;

/// Reads one key-only record per filesystem path matching a glob pattern.
///
/// Keys are the encoded absolute paths, so the output is sorted and can feed
/// a writer or a [`DemuxingReader`](super::DemuxingReader) directly.
/// Unreadable directories met while expanding the pattern are logged and
/// skipped.
#[derive(Debug, Clone)]
pub struct GlobReader {
    pattern: String,
}

impl GlobReader {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Expands the pattern into sorted absolute paths.
    pub fn paths(&self) -> Result<Vec<String>> {
        let cwd = std::env::current_dir()?;
        let mut paths = Vec::new();
        for entry in glob::glob(&self.pattern)? {
            match entry {
                Ok(path) => {
                    let absolute: PathBuf = if path.is_absolute() {
                        path
                    } else {
                        cwd.join(path)
                    };
                    paths.push(absolute.to_string_lossy().into_owned());
                }
                Err(err) => warn!(pattern = %self.pattern, error = %err, "skipping unreadable path"),
            }
        }
        paths.sort();
        paths.dedup();
        debug!(pattern = %self.pattern, matches = paths.len(), "expanded glob");
        Ok(paths)
    }
}

impl StoreReader for GlobReader {
    fn name(&self) -> &str {
        &self.pattern
    }

    fn scan(&self) -> Result<RecordIter> {
        let records: Vec<Result<Record>> = self
            .paths()?
            .into_iter()
            .map(|path| Ok(Record::key_only(encode(&path))))
            .collect();
        Ok(Box::new(records.into_iter()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decode;
    use tempfile::TempDir;

    #[test]
    fn test_matches_wildcard_directories_in_order() {
        let dir = TempDir::new().unwrap();
        for (a, b, file) in [
            ("2", "x", "health_2.tar.gz"),
            ("1", "y", "health_1.tar.gz"),
            ("1", "y", "notes.txt"),
        ] {
            let parent = dir.path().join(a).join(b);
            std::fs::create_dir_all(&parent).unwrap();
            std::fs::write(parent.join(file), b"").unwrap();
        }

        let pattern = format!("{}/*/*/health_*.tar.gz", dir.path().display());
        let reader = GlobReader::new(pattern);
        let paths: Vec<String> = reader
            .scan()
            .unwrap()
            .map(|r| decode::<String>(&r.unwrap().key).unwrap())
            .collect();

        assert_eq!(paths.len(), 2);
        assert!(paths[0].ends_with("1/y/health_1.tar.gz"));
        assert!(paths[1].ends_with("2/x/health_2.tar.gz"));
        assert!(paths.iter().all(|p| PathBuf::from(p).is_absolute()));
    }

    #[test]
    fn test_invalid_pattern_is_an_error() {
        assert!(GlobReader::new("[").scan().is_err());
    }
}
