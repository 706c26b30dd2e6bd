//! Operational counters.
//!
//! Pipelines receive a [`MetricsSink`] instead of touching process globals.
//! [`MetricsRegistry`] keeps counters in memory so a binary can log them at the
//! end of a run and a test can assert on them.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::{Arc, Mutex};

use serde::Serialize;

/// Destination for named counters and gauges.
pub trait MetricsSink: Send + Sync + Debug {
    /// Adds `delta` to the counter `name`.
    fn add(&self, name: &str, delta: i64);

    /// Overwrites the gauge `name`.
    fn set(&self, name: &str, value: i64);

    /// Overwrites the text gauge `name`.
    fn set_text(&self, name: &str, value: &str);

    /// Adds one to the counter `name`.
    fn increment(&self, name: &str) {
        self.add(name, 1);
    }
}

/// Shared handle to a metrics sink.
pub type SharedMetrics = Arc<dyn MetricsSink>;

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn add(&self, _name: &str, _delta: i64) {}
    fn set(&self, _name: &str, _value: i64) {}
    fn set_text(&self, _name: &str, _value: &str) {}
}

/// Point-in-time copy of a registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub counters: BTreeMap<String, i64>,
    pub texts: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
struct RegistryState {
    counters: BTreeMap<String, i64>,
    texts: BTreeMap<String, String>,
}

/// In-process counter table.
#[derive(Debug, Default, Clone)]
pub struct MetricsRegistry {
    state: Arc<Mutex<RegistryState>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of a counter, zero if it was never touched.
    pub fn get(&self, name: &str) -> i64 {
        self.with_state(|state| state.counters.get(name).copied().unwrap_or(0))
    }

    /// Current value of a text gauge.
    pub fn text(&self, name: &str) -> Option<String> {
        self.with_state(|state| state.texts.get(name).cloned())
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.with_state(|state| MetricsSnapshot {
            counters: state.counters.clone(),
            texts: state.texts.clone(),
        })
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut RegistryState) -> R) -> R {
        // A panic while holding the lock leaves the counters intact.
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }
}

impl MetricsSink for MetricsRegistry {
    fn add(&self, name: &str, delta: i64) {
        self.with_state(|state| *state.counters.entry(name.to_string()).or_insert(0) += delta);
    }

    fn set(&self, name: &str, value: i64) {
        self.with_state(|state| {
            state.counters.insert(name.to_string(), value);
        });
    }

    fn set_text(&self, name: &str, value: &str) {
        self.with_state(|state| {
            state.texts.insert(name.to_string(), value.to_string());
        });
    }
}
