//! Installed package versions and the points where they change.

use tracing::debug;

use super::{logs_of_kind, read_log};
use crate::codec::{decode, encode};
use crate::error::Result;
use crate::pipeline::{do_fn, group_fn, Emitter, Grouper, Pipeline, PipelineStage};
use crate::sinks::Sinks;
use crate::store::{truncating, Column, Record, StoreManager};

/// Store of `(node, package, timestamp) → version` for every sample.
pub const INSTALLED_PACKAGES: &str = "installed-packages";
/// Same shape as [`INSTALLED_PACKAGES`], keeping only samples whose version
/// differs from the previous one.
pub const VERSION_CHANGES: &str = "version-changes";

/// Parses `opkg list-installed` output, one `name - version` per line.
pub fn extract_installed_packages(record: Record, output: &Emitter) -> Result<()> {
    let (key, text) = read_log(&record)?;
    for line in text.split('\n').filter(|line| !line.is_empty()) {
        let parts: Vec<&str> = line.split(" - ").collect();
        let [package, version] = parts.as_slice() else {
            debug!(node = %key.node, line, "invalid opkg line");
            continue;
        };
        output.emit(Record::new(
            encode(&(key.node.as_str(), *package, key.timestamp)),
            encode(*version),
        ))?;
    }
    Ok(())
}

/// Keeps the first sample of each package and every sample that changed its
/// version.
pub fn detect_version_changes(grouper: &mut Grouper<(String, String)>, output: &Emitter) -> Result<()> {
    while grouper.next_group()?.is_some() {
        let mut last_version = String::new();
        while let Some(record) = grouper.next_record()? {
            let version: String = decode(record.value())?;
            if version != last_version {
                output.emit(record.into_record())?;
            }
            last_version = version;
        }
    }
    Ok(())
}

pub fn packages_pipeline<M: StoreManager>(manager: &M, sinks: &Sinks) -> Result<Pipeline> {
    let installed = manager.open(INSTALLED_PACKAGES)?;
    let changes = manager.open(VERSION_CHANGES)?;
    let keys = || {
        vec![
            Column::str("node"),
            Column::str("package"),
            Column::int("timestamp"),
        ]
    };
    let values = || vec![Column::str("version")];

    Ok(Pipeline::new()
        .stage(
            PipelineStage::new("OpkgListInstalled", logs_of_kind(manager, &["opkg_list-installed"])?)
                .transform(do_fn(extract_installed_packages))
                .writer(truncating(installed.clone())),
        )
        .stage(
            PipelineStage::new("DetectVersionChanges", installed)
                .transform(group_fn(detect_version_changes))
                .writer(truncating(changes.clone())),
        )
        .stages(sinks.sqlite_stage("WriteVersionChangesSqlite", changes.clone(), "packages", keys(), values())?)
        .stages(sinks.csv_stage("WriteVersionChangesCsv", changes, "packages.csv", keys(), values())))
}
