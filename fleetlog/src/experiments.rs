//! Pipelines over experiments-manager logs.

use std::path::Path;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::codec::{decode, encode};
use crate::error::Result;
use crate::indexer::{index_tarballs_pipeline, ExperimentsManagerLogs};
use crate::keys::LogKey;
use crate::metrics::SharedMetrics;
use crate::pipeline::{map_fn, Pipeline, PipelineStage};
use crate::sinks::Sinks;
use crate::store::{truncating, Column, Record, StoreManager};

/// Store of raw experiments-manager logs.
pub const LOGS: &str = "logs";
/// Store of [`LogKey`]s whose log reported overlapping repositories.
pub const DISJOINT_PACKAGES: &str = "disjoint-packages";

static DISJOINT_ERROR: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"(?m)^Managed and unmanaged repositories must be disjoint!\r?$")
        .expect("Hard-coded regex pattern should be valid")
});

/// Indexes experiments-manager tarballs under `tarballs_path` into [`LOGS`].
pub fn index_pipeline<M: StoreManager>(
    manager: &M,
    tarballs_path: &Path,
    metrics: SharedMetrics,
) -> Result<Pipeline> {
    index_tarballs_pipeline(manager, Arc::new(ExperimentsManagerLogs), tarballs_path, metrics)
}

/// Keeps the key of any log containing the disjoint-repositories error line.
pub fn detect_disjoint_packages_error(record: Record) -> Result<Option<Record>> {
    let key: LogKey = decode(&record.key)?;
    if DISJOINT_ERROR.is_match(&String::from_utf8_lossy(&record.value)) {
        Ok(Some(Record::key_only(encode(&key))))
    } else {
        Ok(None)
    }
}

pub fn disjoint_packages_pipeline<M: StoreManager>(manager: &M, sinks: &Sinks) -> Result<Pipeline> {
    let disjoint = manager.open(DISJOINT_PACKAGES)?;
    Ok(Pipeline::new()
        .stage(
            PipelineStage::new("DisjointPackages", manager.reader(LOGS)?)
                .transform(map_fn(detect_disjoint_packages_error))
                .writer(truncating(disjoint.clone())),
        )
        .stages(sinks.csv_stage(
            "WriteDisjointPackagesCsv",
            disjoint,
            "disjoint-packages.csv",
            vec![
                Column::str("filename"),
                Column::str("node"),
                Column::int("timestamp"),
            ],
            vec![],
        )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{run_pipeline, PipelineOptions};
    use crate::store::{write_all, MemoryManager};
    use tempfile::TempDir;

    fn log(name: &str, node: &str, timestamp: i64, text: &str) -> Record {
        Record::new(encode(&LogKey::new(name, node, timestamp)), text.as_bytes().to_vec())
    }

    #[tokio::test]
    async fn test_disjoint_packages_csv() {
        let manager = MemoryManager::new();
        write_all(
            manager.open(LOGS).unwrap().as_ref(),
            [
                log(
                    "OW1_2013-08-01_17-01-06.gz",
                    "OW1",
                    1_375_376_466,
                    "Updating\nManaged and unmanaged repositories must be disjoint!\r\nDone\n",
                ),
                log("OW2_2013-08-01_17-01-06.gz", "OW2", 1_375_376_466, "Updating\nDone\n"),
                log(
                    "OW3_2013-08-01_17-01-06.gz",
                    "OW3",
                    1_375_376_466,
                    "warning: Managed and unmanaged repositories must be disjoint! (ignored)\n",
                ),
            ],
        )
        .unwrap();
        let dir = TempDir::new().unwrap();
        run_pipeline(
            disjoint_packages_pipeline(&manager, &Sinks::none().with_csv(dir.path())).unwrap(),
            &PipelineOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(
            std::fs::read_to_string(dir.path().join("disjoint-packages.csv")).unwrap(),
            "filename,node,timestamp\nOW1_2013-08-01_17-01-06.gz,OW1,1375376466\n"
        );
    }
}
