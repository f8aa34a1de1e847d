//! Per-plugin execution counters, updated lock-free from the hot path.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

#[derive(Debug, Default)]
pub struct PluginStats {
    executions: AtomicU64,
    failures: AtomicU64,
    total_duration_us: AtomicU64,
}

impl PluginStats {
    pub fn record(&self, duration: Duration, ok: bool) {
        self.executions.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
        self.total_duration_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn executions(&self) -> u64 {
        self.executions.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> PluginStatsSnapshot {
        let executions = self.executions.load(Ordering::Relaxed);
        let total_duration_us = self.total_duration_us.load(Ordering::Relaxed);
        PluginStatsSnapshot {
            executions,
            failures: self.failures.load(Ordering::Relaxed),
            total_duration_ms: total_duration_us / 1_000,
            mean_duration_us: if executions > 0 {
                total_duration_us / executions
            } else {
                0
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PluginStatsSnapshot {
    pub executions: u64,
    pub failures: u64,
    pub total_duration_ms: u64,
    pub mean_duration_us: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_and_averages() {
        let stats = PluginStats::default();
        stats.record(Duration::from_millis(2), true);
        stats.record(Duration::from_millis(4), false);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.executions, 2);
        assert_eq!(snapshot.failures, 1);
        assert_eq!(snapshot.total_duration_ms, 6);
        assert_eq!(snapshot.mean_duration_us, 3_000);
    }
}
