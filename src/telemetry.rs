use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;

/// Aggregated timings for one named operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OperationStats {
    pub calls: u64,
    pub failures: u64,
    pub retries: u64,
    pub total_ms: u64,
    pub max_ms: u64,
}

impl OperationStats {
    pub fn mean_ms(&self) -> u64 {
        if self.calls == 0 {
            0
        } else {
            self.total_ms / self.calls
        }
    }
}

/// Per-operation counters. Constructed by the caller and handed to whatever
/// needs to record into it; there is no process-wide instance.
#[derive(Debug, Default)]
pub struct PerformanceMonitor {
    ops: Mutex<BTreeMap<String, OperationStats>>,
}

impl PerformanceMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_op<R>(&self, operation: &str, f: impl FnOnce(&mut OperationStats) -> R) -> R {
        let mut ops = self.ops.lock().unwrap_or_else(PoisonError::into_inner);
        f(ops.entry(operation.to_string()).or_default())
    }

    pub fn record(&self, operation: &str, elapsed: Duration, ok: bool) {
        let ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        self.with_op(operation, |s| {
            s.calls += 1;
            s.total_ms = s.total_ms.saturating_add(ms);
            s.max_ms = s.max_ms.max(ms);
            if !ok {
                s.failures += 1;
            }
        });
    }

    pub fn record_retry(&self, operation: &str) {
        self.with_op(operation, |s| s.retries += 1);
    }

    pub fn stats(&self, operation: &str) -> Option<OperationStats> {
        self.ops
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(operation)
            .cloned()
    }

    /// Copy of every operation's stats, sorted by name.
    pub fn snapshot(&self) -> BTreeMap<String, OperationStats> {
        self.ops
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
