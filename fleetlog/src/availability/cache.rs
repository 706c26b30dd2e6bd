//! Per-day interval cache files.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;

use crate::error::{ErrorContext, Result};
use crate::stats::Interval;

/// Intervals of every node seen on one day.
pub type DayIntervals = BTreeMap<String, Vec<Interval>>;

/// A directory of `YYYY-MM-DD.json` files, each holding one [`DayIntervals`].
#[derive(Debug, Clone)]
pub struct DayCache {
    dir: PathBuf,
}

impl DayCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, day: NaiveDate) -> PathBuf {
        self.dir.join(format!("{}.json", day.format("%Y-%m-%d")))
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        self.path(day).is_file()
    }

    pub fn load(&self, day: NaiveDate) -> Result<Option<DayIntervals>> {
        let path = self.path(day);
        if !path.is_file() {
            return Ok(None);
        }
        let text = fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
        Ok(Some(serde_json::from_str(&text)?))
    }

    /// Replaces the cache file of `day` through a rename.
    pub fn store(&self, day: NaiveDate, intervals: &DayIntervals) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        write_atomically(&self.path(day), &serde_json::to_vec(intervals)?)
    }
}

/// Writes `bytes` to a sibling temporary file, then renames it over `path`.
pub fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let temp_path = path.with_extension("tmp");
    fs::write(&temp_path, bytes).with_context(|| format!("writing {}", temp_path.display()))?;
    fs::rename(&temp_path, path).with_context(|| format!("renaming to {}", path.display()))?;
    Ok(())
}
