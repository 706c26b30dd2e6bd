//! Experiments-manager bundles: each outer entry is one gzipped log.

use std::io::Read;

use flate2::read::GzDecoder;

use super::{EntryContext, EntryMeta, LogFamily};
use crate::codec::encode;
use crate::error::{FleetError, Result};
use crate::keys::LogKey;
use crate::time::parse_date_time;

#[derive(Debug, Default, Clone, Copy)]
pub struct ExperimentsManagerLogs;

/// Parses `<NODE>_<YYYY-MM-DD>_<HH-MM-SS>.gz`. The whole file name becomes the
/// log kind.
pub fn parse_experiments_log_name(name: &str) -> Result<LogKey> {
    let base = name.rsplit('/').next().unwrap_or(name);
    let malformed = || {
        FleetError::Parse(format!(
            "filenames in tarball must have format 'NODE_YYYY-MM-DD_HH-MM-SS.gz': {name}"
        ))
    };
    let pieces: Vec<&str> = base.split('_').collect();
    let [node, date, time] = pieces.as_slice() else {
        return Err(malformed());
    };
    let time = time.strip_suffix(".gz").ok_or_else(malformed)?;
    let timestamp = parse_date_time(date, time)?;
    Ok(LogKey::new(base, *node, timestamp))
}

impl LogFamily for ExperimentsManagerLogs {
    fn name(&self) -> &str {
        "experiments-manager"
    }

    fn tarball_pattern(&self) -> &str {
        "*/*/bismark-experiments-manager_*.tar.gz"
    }

    fn index_entry(&self, entry: &EntryMeta, contents: &mut dyn Read, ctx: &EntryContext<'_>) -> Result<()> {
        if !entry.path.ends_with(".gz") {
            return Ok(());
        }
        let mut log = Vec::new();
        if let Err(err) = GzDecoder::new(contents).read_to_end(&mut log) {
            ctx.skip(&entry.path, err);
            return Ok(());
        }
        match parse_experiments_log_name(&entry.path) {
            Ok(key) => ctx.emit(encode(&key), log),
            Err(err) => {
                ctx.skip(&entry.path, err);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_name() {
        let key = parse_experiments_log_name("logs/OWC43DC7A3EE43_2013-08-01_17-01-06.gz").unwrap();
        assert_eq!(
            key,
            LogKey::new(
                "OWC43DC7A3EE43_2013-08-01_17-01-06.gz",
                "OWC43DC7A3EE43",
                1_375_376_466
            )
        );
    }

    #[test]
    fn test_rejects_malformed_names() {
        assert!(parse_experiments_log_name("OWC43DC7A3EE43_2013-08-01.gz").is_err());
        assert!(parse_experiments_log_name("OWC43DC7A3EE43_2013-08-01_17-01-06").is_err());
        assert!(parse_experiments_log_name("a_b_c_d.gz").is_err());
    }
}
