//! Connected device counts from switch and wireless station logs.

use super::{logs_of_kind, read_log};
use crate::codec::encode;
use crate::error::Result;
use crate::pipeline::{do_fn, Emitter, Pipeline, PipelineStage};
use crate::store::{truncating, Record, StoreManager, StoreWriter};

/// Store of `(node, interface, timestamp) → device_count`.
pub const DEVICES_COUNT: &str = "devices-count";

/// Counts switch ports reporting `link:up`; keyed under the `ethernet`
/// interface.
pub fn extract_ethernet_count(record: Record, output: &Emitter) -> Result<()> {
    let (key, text) = read_log(&record)?;
    let count = text
        .split('\n')
        .filter(|line| line.split_whitespace().nth(1) == Some("link:up"))
        .count() as i64;
    output.emit(Record::new(
        encode(&(key.node.as_str(), "ethernet", key.timestamp)),
        encode(&count),
    ))
}

/// Parses `<iface>: <count>` lines, one record per interface.
pub fn extract_wireless_count(record: Record, output: &Emitter) -> Result<()> {
    let (key, text) = read_log(&record)?;
    for line in text.split('\n') {
        let words: Vec<&str> = line.split_whitespace().collect();
        if words.len() < 2 {
            continue;
        }
        let Ok(count) = words[1].parse::<i64>() else {
            continue;
        };
        let interface = words[0].strip_suffix(':').unwrap_or(words[0]);
        output.emit(Record::new(
            encode(&(key.node.as_str(), interface, key.timestamp)),
            encode(&count),
        ))?;
    }
    Ok(())
}

/// Both stages write [`DEVICES_COUNT`]; the first rebuilds it and the second
/// merges wireless counts in.
pub fn devices_count_pipeline<M: StoreManager>(manager: &M) -> Result<Pipeline> {
    let devices = manager.open(DEVICES_COUNT)?;
    let merge: std::sync::Arc<dyn StoreWriter> = devices.clone();
    Ok(Pipeline::new()
        .stage(
            PipelineStage::new("ExtractEthernetCount", logs_of_kind(manager, &["swconfig_ports"])?)
                .transform(do_fn(extract_ethernet_count))
                .writer(truncating(devices)),
        )
        .stage(
            PipelineStage::new("ExtractWirelessCount", logs_of_kind(manager, &["iw_station_count"])?)
                .transform(do_fn(extract_wireless_count))
                .writer(merge),
        ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decode;
    use crate::health::test_support::{manager_with_logs, run};
    use crate::store::read_all;

    #[tokio::test]
    async fn test_counts_from_both_logs() {
        let manager = manager_with_logs(&[
            (
                "swconfig_ports",
                "node",
                100,
                "port:0 link:up speed:100baseT\nport:1 link:down\nport:2 link:up speed:1000baseT\n",
            ),
            ("iw_station_count", "node", 100, "wlan0: 3\nwlan1: 0\ngarbage\nwlan2: many\n"),
        ]);
        run(devices_count_pipeline(&manager).unwrap()).await;

        let counts: Vec<((String, String, i64), i64)> = read_all(manager.open(DEVICES_COUNT).unwrap().as_ref())
            .unwrap()
            .iter()
            .map(|r| (decode(&r.key).unwrap(), decode(&r.value).unwrap()))
            .collect();
        let row = |iface: &str, n| (("node".to_string(), iface.to_string(), 100), n);
        assert_eq!(counts, vec![row("ethernet", 2), row("wlan0", 3), row("wlan1", 0)]);
    }
}
