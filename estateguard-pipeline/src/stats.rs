//! Orchestrator counters.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;

#[derive(Debug, Default)]
pub struct OrchestratorStats {
    events_processed: AtomicU64,
    events_failed: AtomicU64,
    events_retried: AtomicU64,
    events_dead_lettered: AtomicU64,
    duplicates_skipped: AtomicU64,
    total_processing_us: AtomicU64,
    plugin_executions: DashMap<String, u64>,
}

impl OrchestratorStats {
    pub fn record_success(&self, duration: Duration) {
        self.events_processed.fetch_add(1, Ordering::Relaxed);
        self.total_processing_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.events_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.events_retried.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dead_letter(&self) {
        self.events_dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate(&self) {
        self.duplicates_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_plugin_execution(&self, plugin_id: &str) {
        *self.plugin_executions.entry(plugin_id.to_string()).or_insert(0) += 1;
    }

    pub fn events_processed(&self) -> u64 {
        self.events_processed.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> OrchestratorStatsSnapshot {
        let processed = self.events_processed.load(Ordering::Relaxed);
        let total_us = self.total_processing_us.load(Ordering::Relaxed);
        OrchestratorStatsSnapshot {
            events_processed: processed,
            events_failed: self.events_failed.load(Ordering::Relaxed),
            events_retried: self.events_retried.load(Ordering::Relaxed),
            events_dead_lettered: self.events_dead_lettered.load(Ordering::Relaxed),
            duplicates_skipped: self.duplicates_skipped.load(Ordering::Relaxed),
            total_processing_ms: total_us / 1_000,
            mean_processing_ms: if processed > 0 {
                total_us / processed / 1_000
            } else {
                0
            },
            plugin_executions: self
                .plugin_executions
                .iter()
                .map(|entry| (entry.key().clone(), *entry.value()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStatsSnapshot {
    pub events_processed: u64,
    pub events_failed: u64,
    pub events_retried: u64,
    pub events_dead_lettered: u64,
    pub duplicates_skipped: u64,
    pub total_processing_ms: u64,
    pub mean_processing_ms: u64,
    pub plugin_executions: BTreeMap<String, u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = OrchestratorStats::default();
        stats.record_success(Duration::from_millis(10));
        stats.record_success(Duration::from_millis(20));
        stats.record_failure();
        stats.record_retry();
        stats.record_plugin_execution("plugin-processing-normalizer");
        stats.record_plugin_execution("plugin-processing-normalizer");

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.events_processed, 2);
        assert_eq!(snapshot.events_failed, 1);
        assert_eq!(snapshot.events_retried, 1);
        assert_eq!(snapshot.mean_processing_ms, 15);
        assert_eq!(
            snapshot.plugin_executions["plugin-processing-normalizer"],
            2
        );
    }
}
