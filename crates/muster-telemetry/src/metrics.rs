use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// In-memory counter. Monotonically increasing.
struct Counter {
    value: AtomicU64,
}

impl Counter {
    fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }
    fn increment(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }
    fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// A point-in-time view of every counter.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub counters: HashMap<String, u64>,
}

/// Named counters for crew activity (model calls, tool executions, cache
/// hits, workers spawned, ...). Cheap to clone and share.
#[derive(Clone, Default)]
pub struct MetricsRecorder {
    counters: Arc<RwLock<HashMap<String, Arc<Counter>>>>,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    fn counter(&self, name: &str) -> Arc<Counter> {
        if let Some(counter) = self.counters.read().get(name) {
            return Arc::clone(counter);
        }
        let mut counters = self.counters.write();
        Arc::clone(
            counters
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Counter::new())),
        )
    }

    pub fn increment(&self, name: &str, n: u64) {
        self.counter(name).increment(n);
    }

    pub fn get(&self, name: &str) -> u64 {
        self.counters
            .read()
            .get(name)
            .map(|c| c.get())
            .unwrap_or(0)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            counters: self
                .counters
                .read()
                .iter()
                .map(|(name, counter)| (name.clone(), counter.get()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increment_and_get() {
        let metrics = MetricsRecorder::new();
        metrics.increment("tool_calls", 1);
        metrics.increment("tool_calls", 2);
        assert_eq!(metrics.get("tool_calls"), 3);
    }

    #[test]
    fn unknown_counter_is_zero() {
        let metrics = MetricsRecorder::new();
        assert_eq!(metrics.get("nope"), 0);
    }

    #[test]
    fn snapshot_captures_all_counters() {
        let metrics = MetricsRecorder::new();
        metrics.increment("a", 1);
        metrics.increment("b", 5);
        let snap = metrics.snapshot();
        assert_eq!(snap.counters["a"], 1);
        assert_eq!(snap.counters["b"], 5);
    }

    #[test]
    fn clones_share_state() {
        let metrics = MetricsRecorder::new();
        let clone = metrics.clone();
        clone.increment("shared", 7);
        assert_eq!(metrics.get("shared"), 7);
    }
}
