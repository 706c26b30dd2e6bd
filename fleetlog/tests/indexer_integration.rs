//! Integration tests for incremental tarball indexing on disk stores.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use flate2::write::GzEncoder;
use flate2::Compression;
use fleetlog::codec::{decode, encode};
use fleetlog::indexer::counters::{
    NESTED_TARS_FAILED, NESTED_TARS_INDEXED, TARS_FAILED, TARS_INDEXED, TARS_SKIPPED,
};
use fleetlog::indexer::{TARNAMES, TARNAMES_INDEXED};
use fleetlog::keys::{LogKey, StatsKey, StatsValue};
use fleetlog::metrics::{MetricsRegistry, SharedMetrics};
use fleetlog::pipeline::{run_pipeline, PipelineOptions};
use fleetlog::sinks::Sinks;
use fleetlog::store::disk::DiskOptions;
use fleetlog::store::{read_all, DiskManager, Record, StoreDeleter, StoreManager};
use fleetlog::{experiments, health, uploads};
use tempfile::TempDir;

const RECEIVED: u64 = 1_372_800_000;

/// Builds a gzipped tar holding `entries`, all stamped with [`RECEIVED`].
fn tar_gz(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (name, data) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(RECEIVED);
        builder.append_data(&mut header, name, *data).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

fn gzip(data: &[u8]) -> Vec<u8> {
    use std::io::Write;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

fn put(root: &Path, relative: &str, bytes: &[u8]) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, bytes).unwrap();
}

fn health_bundle(node: &str, date: &str, time: &str, uptime: &str) -> Vec<u8> {
    let run = format!("health_{node}_{date}_{time}");
    let nested = tar_gz(&[
        (format!("{run}/uptime").as_str(), uptime.as_bytes()),
        (format!("{run}/free").as_str(), b"Mem: 126884 31716 95168 0\n".as_slice()),
    ]);
    tar_gz(&[
        (format!("{run}.tar.gz").as_str(), nested.as_slice()),
        ("README", b"not a log".as_slice()),
    ])
}

struct Fixture {
    _dir: TempDir,
    tarballs: std::path::PathBuf,
    manager: DiskManager,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let tarballs = dir.path().join("tarballs");
        fs::create_dir_all(&tarballs).unwrap();
        let manager = DiskManager::new(dir.path().join("stores"), DiskOptions::default()).unwrap();
        Self {
            _dir: dir,
            tarballs,
            manager,
        }
    }

    fn keys<T: fleetlog::codec::KeyDecode>(&self, store: &str) -> Vec<T> {
        read_all(self.manager.open(store).unwrap().as_ref())
            .unwrap()
            .iter()
            .map(|record| decode(&record.key).unwrap())
            .collect()
    }

    fn records(&self, store: &str) -> Vec<Record> {
        read_all(self.manager.open(store).unwrap().as_ref()).unwrap()
    }
}

async fn index_health(fixture: &Fixture) -> MetricsRegistry {
    let registry = MetricsRegistry::new();
    let metrics: SharedMetrics = Arc::new(registry.clone());
    let pipeline = health::index_pipeline(&fixture.manager, &fixture.tarballs, metrics).unwrap();
    run_pipeline(pipeline, &PipelineOptions::default()).await.unwrap();
    registry
}

#[tokio::test]
async fn test_health_reindexing_only_reads_new_tarballs() {
    let fixture = Fixture::new();
    put(
        &fixture.tarballs,
        "OW1/2013-07-01/health_OW1_2013-07-01_22-00-41.tar.gz",
        &health_bundle("OW1", "2013-07-01", "22-00-41", "Mon Jul 1\n100.5 90.0\n"),
    );

    let first = index_health(&fixture).await;
    assert_eq!(first.get(TARS_INDEXED), 1);
    assert_eq!(first.get(NESTED_TARS_INDEXED), 1);
    assert_eq!(first.get(TARS_SKIPPED), 0);

    assert_eq!(
        fixture.keys::<LogKey>(health::LOGS),
        vec![
            LogKey::new("free", "OW1", 1_372_716_041),
            LogKey::new("uptime", "OW1", 1_372_716_041),
        ]
    );
    let logs = fixture.records(health::LOGS);

    let second = index_health(&fixture).await;
    assert_eq!(second.get(TARS_INDEXED), 0);
    assert_eq!(second.get(TARS_SKIPPED), 1);
    assert_eq!(fixture.records(health::LOGS), logs);

    put(
        &fixture.tarballs,
        "OW2/2013-07-02/health_OW2_2013-07-02_01-00-00.tar.gz",
        &health_bundle("OW2", "2013-07-02", "01-00-00", "Tue Jul 2\n5.0 4.0\n"),
    );
    let third = index_health(&fixture).await;
    assert_eq!(third.get(TARS_INDEXED), 1);
    assert_eq!(third.get(TARS_SKIPPED), 1);
    assert_eq!(fixture.keys::<LogKey>(health::LOGS).len(), 4);
    assert_eq!(fixture.keys::<String>(TARNAMES_INDEXED).len(), 2);
}

#[tokio::test]
async fn test_logs_committed_without_marker_are_reindexed() {
    let fixture = Fixture::new();
    put(
        &fixture.tarballs,
        "OW1/2013-07-01/health_OW1_2013-07-01_22-00-41.tar.gz",
        &health_bundle("OW1", "2013-07-01", "22-00-41", "Mon Jul 1\n100.5 90.0\n"),
    );
    index_health(&fixture).await;
    let logs = fixture.records(health::LOGS);
    assert_eq!(logs.len(), 2);

    // A crash after the logs commit but before the marker commit leaves the
    // logs in place with no marker.
    fixture.manager.open(TARNAMES_INDEXED).unwrap().delete().unwrap();
    assert!(fixture.records(TARNAMES_INDEXED).is_empty());

    let rerun = index_health(&fixture).await;
    assert_eq!(rerun.get(TARS_INDEXED), 1);
    assert_eq!(rerun.get(TARS_SKIPPED), 0);
    assert_eq!(fixture.records(TARNAMES_INDEXED).len(), 1);
    assert_eq!(fixture.records(health::LOGS), logs);
}

#[tokio::test]
async fn test_failed_tarballs_are_retried() {
    let fixture = Fixture::new();
    put(
        &fixture.tarballs,
        "OW1/2013-07-01/health_OW1_2013-07-01_00-00-00.tar.gz",
        b"plain text, not gzip",
    );
    put(
        &fixture.tarballs,
        "OW1/2013-07-01/health_OW1_2013-07-01_01-00-00.tar.gz",
        &[0x1f, 0x8b, 0xff, 0xff, 0xff, 0xff],
    );

    let first = index_health(&fixture).await;
    assert_eq!(first.get(TARS_FAILED), 2);
    assert!(fixture.keys::<String>(TARNAMES_INDEXED).is_empty());
    assert_eq!(fixture.keys::<String>(TARNAMES).len(), 2);

    let second = index_health(&fixture).await;
    assert_eq!(second.get(TARS_FAILED), 2);
    assert_eq!(second.get(TARS_SKIPPED), 0);
}

#[tokio::test]
async fn test_broken_nested_tarball_keeps_outer_marker() {
    let fixture = Fixture::new();
    put(
        &fixture.tarballs,
        "OW1/2013-07-01/health_OW1_2013-07-01_00-00-00.tar.gz",
        &tar_gz(&[("health_OW1_2013-07-01_00-00-00.tar.gz", b"garbage".as_slice())]),
    );

    let registry = index_health(&fixture).await;
    assert_eq!(registry.get(NESTED_TARS_FAILED), 1);
    assert_eq!(registry.get(TARS_INDEXED), 1);
    assert_eq!(fixture.keys::<String>(TARNAMES_INDEXED).len(), 1);
}

#[tokio::test]
async fn test_upload_stats_come_from_headers() {
    let fixture = Fixture::new();
    let payload = vec![7u8; 1234];
    put(
        &fixture.tarballs,
        "passive/OW1/2013-07-01/upload.tar.gz",
        &tar_gz(&[
            ("passive_OW1_20130701_220041/passive-1372716041000000-3.gz", payload.as_slice()),
            ("unknown_OW1_20130701_220041/blob", b"xyz".as_slice()),
            ("no-directory", b"skipped".as_slice()),
        ]),
    );

    let registry = MetricsRegistry::new();
    let pipeline = uploads::index_pipeline(&fixture.manager, &fixture.tarballs, Arc::new(registry.clone())).unwrap();
    run_pipeline(pipeline, &PipelineOptions::default()).await.unwrap();
    assert_eq!(registry.get(TARS_INDEXED), 1);

    let records = read_all(fixture.manager.open(uploads::STATS).unwrap().as_ref()).unwrap();
    let stats: Vec<(StatsKey, StatsValue)> = records
        .iter()
        .map(|r| (decode(&r.key).unwrap(), decode(&r.value).unwrap()))
        .collect();
    assert_eq!(stats.len(), 2);
    assert_eq!(stats[0].0.experiment, "passive");
    assert_eq!(
        stats[0].1,
        StatsValue {
            received: RECEIVED as i64,
            created: 1_372_716_041 + 90,
            size: 1234,
        }
    );
    assert_eq!(stats[1].0.experiment, "unknown");
    assert_eq!(stats[1].1.created, -1);
}

#[tokio::test]
async fn test_experiments_logs_feed_disjoint_detection() {
    let fixture = Fixture::new();
    let failing = gzip(b"starting\nManaged and unmanaged repositories must be disjoint!\n");
    let healthy = gzip(b"starting\nall good\n");
    put(
        &fixture.tarballs,
        "OW1/2013-07-01/bismark-experiments-manager_OW1.tar.gz",
        &tar_gz(&[
            ("OW1_2013-07-01_10-00-00.gz", failing.as_slice()),
            ("OW1_2013-07-01_11-00-00.gz", healthy.as_slice()),
        ]),
    );

    let pipeline =
        experiments::index_pipeline(&fixture.manager, &fixture.tarballs, Arc::new(MetricsRegistry::new())).unwrap();
    run_pipeline(pipeline, &PipelineOptions::default()).await.unwrap();
    assert_eq!(fixture.keys::<LogKey>(experiments::LOGS).len(), 2);

    let pipeline = experiments::disjoint_packages_pipeline(&fixture.manager, &Sinks::none()).unwrap();
    run_pipeline(pipeline, &PipelineOptions::default()).await.unwrap();
    assert_eq!(
        fixture.keys::<LogKey>(experiments::DISJOINT_PACKAGES),
        vec![LogKey::new("OW1_2013-07-01_10-00-00.gz", "OW1", 1_372_672_800)]
    );
}

#[tokio::test]
async fn test_stores_survive_reopening() {
    let fixture = Fixture::new();
    put(
        &fixture.tarballs,
        "OW1/2013-07-01/health_OW1_2013-07-01_22-00-41.tar.gz",
        &health_bundle("OW1", "2013-07-01", "22-00-41", "x\n1.0 1.0\n"),
    );
    index_health(&fixture).await;

    let reopened = DiskManager::new(fixture.manager.root(), DiskOptions::default()).unwrap();
    let markers = read_all(reopened.open(TARNAMES_INDEXED).unwrap().as_ref()).unwrap();
    assert_eq!(markers.len(), 1);
    let marked: String = decode(&markers[0].key).unwrap();
    assert!(marked.ends_with("health_OW1_2013-07-01_22-00-41.tar.gz"));
    assert_eq!(markers[0].key, encode(&marked));
}
