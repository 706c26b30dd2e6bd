//! Memory usage from the first line of `top`.

use tracing::debug;

use super::{logs_of_kind, read_log};
use crate::codec::encode;
use crate::error::Result;
use crate::pipeline::{do_fn, Emitter, Pipeline, PipelineStage};
use crate::sinks::Sinks;
use crate::store::{truncating, Column, Record, StoreManager};

/// Store of `(node, timestamp) → (used_kb, free_kb)`.
pub const MEMORY: &str = "memory";

fn parse_kilobytes(word: &str) -> Option<i64> {
    word.strip_suffix('K')?.parse().ok()
}

/// Parses `Mem: <used>K used, <free>K free, ...`.
pub fn extract_memory_usage(record: Record, output: &Emitter) -> Result<()> {
    let (key, text) = read_log(&record)?;
    let line = text.split('\n').next().unwrap_or_default();
    let words: Vec<&str> = line.split(' ').collect();
    if words.len() < 4 || words[0] != "Mem:" {
        debug!(node = %key.node, timestamp = key.timestamp, "expected a line beginning with 'Mem:'");
        return Ok(());
    }
    let (Some(used), Some(free)) = (parse_kilobytes(words[1]), parse_kilobytes(words[3])) else {
        debug!(node = %key.node, timestamp = key.timestamp, "memory figures are not in kilobytes");
        return Ok(());
    };
    output.emit(Record::new(
        encode(&(key.node.as_str(), key.timestamp)),
        encode(&(used, free)),
    ))
}

pub fn memory_usage_pipeline<M: StoreManager>(manager: &M, sinks: &Sinks) -> Result<Pipeline> {
    let memory = manager.open(MEMORY)?;
    Ok(Pipeline::new()
        .stage(
            PipelineStage::new("Memory", logs_of_kind(manager, &["top"])?)
                .transform(do_fn(extract_memory_usage))
                .writer(truncating(memory.clone())),
        )
        .stages(sinks.csv_stage(
            "WriteMemoryUsageCsv",
            memory,
            "memory.csv",
            vec![Column::str("node"), Column::int("timestamp")],
            vec![Column::int("used"), Column::int("free")],
        )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::test_support::{manager_with_logs, read_csv, run};
    use tempfile::TempDir;

    const TOP: &str = "Mem: 31716K used, 95168K free, 0K shrd, 3504K buff, 13108K cached
CPU:   0% usr   0% sys   0% nic 100% idle   0% io   0% irq   0% sirq
Load average: 0.00 0.00 0.00 1/47 8436
  PID  PPID USER     STAT   VSZ %MEM %CPU COMMAND
 3598  3597 root     S     3540   3%   0% /usr/bin/bismark-data-transmit.bin
    1     0 root     S     1412   1%   0% init";

    async fn memory_csv(logs: &[(&str, &str, i64, &str)]) -> String {
        let manager = manager_with_logs(logs);
        let dir = TempDir::new().unwrap();
        run(memory_usage_pipeline(&manager, &Sinks::none().with_csv(dir.path())).unwrap()).await;
        read_csv(dir.path(), "memory.csv")
    }

    #[tokio::test]
    async fn test_memory_usage_from_top() {
        assert_eq!(
            memory_csv(&[("top", "node", 0, TOP)]).await,
            "node,timestamp,used,free\nnode,0,31716,95168\n"
        );
    }

    #[tokio::test]
    async fn test_other_log_kinds_are_ignored() {
        assert_eq!(
            memory_csv(&[("other", "node", 0, TOP)]).await,
            "node,timestamp,used,free\n"
        );
    }

    #[tokio::test]
    async fn test_unexpected_units_are_skipped() {
        assert_eq!(
            memory_csv(&[("top", "node", 0, "Mem: 31M used, 95M free")]).await,
            "node,timestamp,used,free\n"
        );
    }
}
