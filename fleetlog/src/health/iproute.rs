//! Default gateway from `ip route`.

use tracing::debug;

use super::{logs_of_kind, read_log};
use crate::codec::encode;
use crate::error::Result;
use crate::pipeline::{do_fn, Emitter, Pipeline, PipelineStage};
use crate::sinks::Sinks;
use crate::store::{truncating, Column, Record, StoreManager};

/// Store of `(node, timestamp) → gateway`.
pub const DEFAULT_ROUTES: &str = "default-routes";

pub fn extract_default_route(record: Record, output: &Emitter) -> Result<()> {
    let (key, text) = read_log(&record)?;
    let mut gateway: Option<&str> = None;
    for line in text.split('\n') {
        let words: Vec<&str> = line.split_whitespace().collect();
        if words.len() < 3 || words[0] != "default" {
            continue;
        }
        if gateway.is_some() {
            debug!(node = %key.node, timestamp = key.timestamp, "multiple default routes");
            continue;
        }
        gateway = Some(words[2]);
    }
    match gateway {
        Some(gateway) => output.emit(Record::new(
            encode(&(key.node.as_str(), key.timestamp)),
            encode(gateway),
        )),
        None => Ok(()),
    }
}

pub fn ip_route_pipeline<M: StoreManager>(manager: &M, sinks: &Sinks) -> Result<Pipeline> {
    let routes = manager.open(DEFAULT_ROUTES)?;
    let keys = || vec![Column::str("node"), Column::int("timestamp")];
    let values = || vec![Column::str("gateway")];

    Ok(Pipeline::new()
        .stage(
            PipelineStage::new("ExtractDefaultRoute", logs_of_kind(manager, &["iproute"])?)
                .transform(do_fn(extract_default_route))
                .writer(truncating(routes.clone())),
        )
        .stages(sinks.sqlite_stage("WriteDefaultRoutesSqlite", routes.clone(), "defaultroutes", keys(), values())?)
        .stages(sinks.csv_stage("WriteDefaultRoutesCsv", routes, "defaultroutes.csv", keys(), values())))
}
