//! One `created,received` timeline per experiment and node.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use super::STATS;
use crate::codec::decode;
use crate::error::{FleetError, Result};
use crate::keys::StatsValue;
use crate::pipeline::{group_fn, Emitter, Grouper, Pipeline, PipelineStage};
use crate::sinks::Sinks;
use crate::store::{csv_line, StoreManager};

fn write_timeline(path: &Path, grouper: &mut Grouper<(String, String)>) -> Result<()> {
    let temp_path = path.with_extension("csv.tmp");
    let mut out = BufWriter::new(File::create(&temp_path)?);
    writeln!(out, "created,received")?;
    while let Some(record) = grouper.next_record()? {
        let value: StatsValue = decode(record.value())?;
        writeln!(
            out,
            "{}",
            csv_line(&[value.created.to_string(), value.received.to_string()])
        )?;
    }
    out.into_inner()
        .map_err(|err| FleetError::Io(err.into_error()))?
        .sync_all()?;
    fs::rename(&temp_path, path)?;
    Ok(())
}

/// Writes `<experiment>_<node>.csv` under `dir` for every group of `stats`.
/// Emits nothing.
pub fn write_times_csv(dir: &Path, grouper: &mut Grouper<(String, String)>, _output: &Emitter) -> Result<()> {
    fs::create_dir_all(dir)?;
    while let Some((experiment, node)) = grouper.next_group()? {
        write_timeline(&dir.join(format!("{experiment}_{node}.csv")), grouper)?;
    }
    Ok(())
}

/// Requires a CSV sink; the timelines are written into its directory.
pub fn times_csv_pipeline<M: StoreManager>(manager: &M, sinks: &Sinks) -> Result<Pipeline> {
    let dir: PathBuf = sinks
        .csv()
        .map(|csv| csv.dir().to_path_buf())
        .ok_or_else(|| FleetError::Configuration("the times pipeline needs a CSV output directory".to_string()))?;
    Ok(Pipeline::new().stage(
        PipelineStage::new("WriteTimesCsv", manager.reader(STATS)?).transform(group_fn(
            move |grouper: &mut Grouper<(String, String)>, output: &Emitter| {
                write_times_csv(&dir, grouper, output)
            },
        )),
    ))
}
