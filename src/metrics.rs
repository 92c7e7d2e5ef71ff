//! Rebuild statistics: rebuild latency, mutation and suppression counts.

use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;

/// Number of most recent rebuild latencies kept for averages and percentiles.
const LATENCY_WINDOW: usize = 1024;

/// Runtime counters for one indexed collection.
#[derive(Debug, Clone, Serialize)]
pub struct RebuildStats {
    #[serde(skip)]
    rebuild_latencies_us: VecDeque<f64>,
    total_rebuilds: u64,
    on_read_rebuilds: u64,
    total_mutations: u64,
    suppressed_mutations: u64,
    invalidations: u64,
    bulk_operations: u64,
}

impl RebuildStats {
    pub fn new() -> Self {
        Self {
            rebuild_latencies_us: VecDeque::with_capacity(LATENCY_WINDOW),
            total_rebuilds: 0,
            on_read_rebuilds: 0,
            total_mutations: 0,
            suppressed_mutations: 0,
            invalidations: 0,
            bulk_operations: 0,
        }
    }

    /// Record a completed rebuild with its duration.
    pub fn record_rebuild(&mut self, duration: Duration, on_read: bool) {
        self.total_rebuilds += 1;
        if on_read {
            self.on_read_rebuilds += 1;
        }
        if self.rebuild_latencies_us.len() == LATENCY_WINDOW {
            self.rebuild_latencies_us.pop_front();
        }
        self.rebuild_latencies_us.push_back(duration.as_micros() as f64);
    }

    /// Record a change notification from the underlying collection.
    pub fn record_mutation(&mut self, suppressed: bool) {
        self.total_mutations += 1;
        if suppressed {
            self.suppressed_mutations += 1;
        }
    }

    pub fn record_invalidation(&mut self) {
        self.invalidations += 1;
    }

    pub fn record_bulk(&mut self) {
        self.bulk_operations += 1;
    }

    pub fn total_rebuilds(&self) -> u64 {
        self.total_rebuilds
    }

    /// Rebuilds triggered by reading a stale index.
    pub fn on_read_rebuilds(&self) -> u64 {
        self.on_read_rebuilds
    }

    pub fn total_mutations(&self) -> u64 {
        self.total_mutations
    }

    /// Mutations absorbed by an active bulk operation.
    pub fn suppressed_mutations(&self) -> u64 {
        self.suppressed_mutations
    }

    pub fn invalidations(&self) -> u64 {
        self.invalidations
    }

    pub fn bulk_operations(&self) -> u64 {
        self.bulk_operations
    }

    /// Average rebuild latency in microseconds.
    pub fn avg_rebuild_latency_us(&self) -> f64 {
        if self.rebuild_latencies_us.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.rebuild_latencies_us.iter().sum();
        sum / self.rebuild_latencies_us.len() as f64
    }

    /// Get a percentile of rebuild latency (e.g., 50.0, 95.0, 99.0).
    pub fn percentile_rebuild_latency_us(&self, percentile: f64) -> f64 {
        if self.rebuild_latencies_us.is_empty() {
            return 0.0;
        }

        let mut sorted: Vec<f64> = self.rebuild_latencies_us.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let index = ((percentile / 100.0) * (sorted.len() - 1) as f64).round() as usize;
        sorted[index.min(sorted.len() - 1)]
    }
}

impl Default for RebuildStats {
    fn default() -> Self {
        Self::new()
    }
}
