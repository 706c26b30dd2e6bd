//! # fleetlog - incremental ingestion of router fleet log bundles
//!
//! fleetlog indexes periodically uploaded, gzip-tarred log bundles from a
//! fleet of routers into ordered key-value stores, then derives time series
//! from them with chains of batch stages: uptime and reboots, memory and disk
//! usage, package versions, upload size distributions, and per-node
//! availability windows.
//!
//! ## Overview
//!
//! Everything is built from a few pieces:
//!
//! - **Key codec** ([`codec`]): tuple encoding whose byte order equals the
//!   tuple order, so sorted stores group naturally by key prefix.
//! - **Record stores** ([`store`]): sorted byte maps exposed as reader,
//!   seeker, writer and deleter capabilities, backed by memory or by immutable
//!   run files on disk.
//! - **Pipelines** ([`pipeline`]): ordered read → transform → write stages.
//!   A stage commits only when every part of it succeeded.
//! - **Indexer** ([`indexer`]): processes exactly the tarballs that are not
//!   yet marked indexed, so re-running after new uploads only reads new files.
//! - **Statistics** ([`stats`]): reservoir quantiles, reboot inference, and
//!   interval coalescing.
//!
//! The per-family pipelines live in [`health`], [`uploads`], [`experiments`]
//! and [`availability`].
//!
//! ## Quick Start
//!
//! ```rust
//! use fleetlog::prelude::*;
//! use fleetlog::codec::encode;
//! use fleetlog::health::uptime_pipeline;
//! use fleetlog::keys::LogKey;
//! use fleetlog::store::{read_all, write_all, MemoryManager, Record};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<()> {
//! let manager = MemoryManager::new();
//! write_all(
//!     manager.open("logs")?.as_ref(),
//!     [Record::new(
//!         encode(&LogKey::new("uptime", "OW0123456789AB", 1_372_716_041)),
//!         b"Mon Jul  1 22:00:41 UTC 2013\n86400.25 80000.00\n".to_vec(),
//!     )],
//! )?;
//!
//! let pipeline = uptime_pipeline(&manager, &Sinks::none())?;
//! run_pipeline(pipeline, &PipelineOptions::default()).await?;
//!
//! assert_eq!(read_all(manager.open("uptime")?.as_ref())?.len(), 1);
//! # Ok(())
//! # }
//! ```
//!
//! ## Incremental runs
//!
//! Raw stores (`logs`, `stats`, `tarnames-indexed`) only grow. Derived stores
//! are truncated and rewritten by the stage that produces them, so a rerun
//! after new data was indexed gives the same result as a fresh run. Writing the
//! same key twice keeps the last value, which makes re-emitting records after
//! an interrupted run harmless.
//!
//! ## Logging and metrics
//!
//! The library logs through `tracing`; binaries install a subscriber with
//! [`logging::setup::init_logging`]. Operational counters go to an injected
//! [`metrics::MetricsSink`].

pub mod availability;
pub mod codec;
pub mod config;
pub mod error;
pub mod experiments;
pub mod health;
pub mod indexer;
pub mod keys;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod prelude;
pub mod sinks;
pub mod stats;
pub mod store;
pub mod time;
pub mod uploads;
