//! Health bundles: each outer entry is a gzipped tar of one health run.

use std::io::Read;

use flate2::read::GzDecoder;
use tracing::warn;

use super::counters::{NESTED_TARS_FAILED, NESTED_TARS_INDEXED};
use super::{EntryContext, EntryMeta, LogFamily};
use crate::codec::encode;
use crate::error::{FleetError, Result};
use crate::keys::LogKey;
use crate::time::parse_date_time;

#[derive(Debug, Default, Clone, Copy)]
pub struct HealthLogs;

/// Parses `health_<NODE>_<YYYY-MM-DD>_<HH-MM-SS>/<logtype>`, with any leading
/// directories, into a log key.
pub fn parse_health_log_name(name: &str) -> Result<LogKey> {
    let (dir, kind) = name.rsplit_once('/').unwrap_or(("", name));
    let run = dir.rsplit('/').next().unwrap_or(dir);
    let pieces: Vec<&str> = run.split('_').collect();
    if pieces.len() != 4 {
        return Err(FleetError::Parse(format!(
            "directory in tarball must have format 'health_NODE_YYYY-MM-DD_HH-MM-SS': {name}"
        )));
    }
    let timestamp = parse_date_time(pieces[2], pieces[3])?;
    Ok(LogKey::new(kind, pieces[1], timestamp))
}

impl HealthLogs {
    fn index_nested(&self, contents: &mut dyn Read, ctx: &EntryContext<'_>) -> Result<()> {
        let mut archive = tar::Archive::new(GzDecoder::new(contents));
        for entry in archive.entries()? {
            let mut entry = entry?;
            if !entry.header().entry_type().is_file() {
                continue;
            }
            let name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
            let mut log = Vec::new();
            if let Err(err) = entry.read_to_end(&mut log) {
                ctx.skip(&name, err);
                continue;
            }
            match parse_health_log_name(&name) {
                Ok(key) => ctx.emit(encode(&key), log)?,
                Err(err) => ctx.skip(&name, err),
            }
        }
        Ok(())
    }
}

impl LogFamily for HealthLogs {
    fn name(&self) -> &str {
        "health"
    }

    fn tarball_pattern(&self) -> &str {
        "*/*/health_*.tar.gz"
    }

    fn index_entry(&self, entry: &EntryMeta, contents: &mut dyn Read, ctx: &EntryContext<'_>) -> Result<()> {
        if !entry.path.ends_with(".gz") {
            return Ok(());
        }
        match self.index_nested(contents, ctx) {
            Ok(()) => ctx.metrics().increment(NESTED_TARS_INDEXED),
            Err(err) if err.is_channel_closed() => return Err(err),
            Err(err) => {
                warn!(
                    tarball = %ctx.tarball().display(),
                    entry = %entry.path,
                    error = %err,
                    "error reading nested tarball"
                );
                ctx.metrics().increment(NESTED_TARS_FAILED);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_name() {
        let key = parse_health_log_name("health_OW0123456789AB_1970-01-01_00-01-01/log").unwrap();
        assert_eq!(key, LogKey::new("log", "OW0123456789AB", 61));
    }

    #[test]
    fn test_parse_name_with_leading_dot() {
        let key = parse_health_log_name("./health_OW0123456789AB_1970-01-01_00-01-01/log").unwrap();
        assert_eq!(key, LogKey::new("log", "OW0123456789AB", 61));
    }

    #[test]
    fn test_rejects_malformed_names() {
        assert!(parse_health_log_name("log").is_err());
        assert!(parse_health_log_name("health_OW0123456789AB_1970-01-01/log").is_err());
        assert!(parse_health_log_name("health_OW0123456789AB_1970-01-01_25-00-00/log").is_err());
    }
}
