// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Metrics sink contract.
//!
//! The engine publishes counters, histograms, and gauges through this
//! trait; an external collector (e.g. a Prometheus exporter) implements it.
//! The engine never depends on a collector being present.

use parking_lot::Mutex;
use std::collections::HashMap;

/// Metric names emitted by the engine.
pub mod metric {
    pub const JOBS_DISPATCHED: &str = "jobs_dispatched";
    pub const JOBS_COMPLETED: &str = "jobs_completed";
    pub const JOBS_RETRIED: &str = "jobs_retried";
    pub const JOBS_DEAD: &str = "jobs_dead";
    pub const JOBS_TIMEOUT: &str = "jobs_timeout";
    pub const JOB_DURATION_SECONDS: &str = "job_duration_seconds";
    pub const QUEUE_DEPTH: &str = "queue_depth";
    pub const RECOVERY_TIME_SECONDS: &str = "recovery_time_seconds";
}

/// Sink for engine metrics.
pub trait MetricsSink: Send + Sync {
    fn incr_counter(&self, name: &str, delta: u64);
    fn observe_histogram(&self, name: &str, value: f64);
    fn set_gauge(&self, name: &str, value: f64);
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn incr_counter(&self, _name: &str, _delta: u64) {}
    fn observe_histogram(&self, _name: &str, _value: f64) {}
    fn set_gauge(&self, _name: &str, _value: f64) {}
}

/// In-memory sink for tests and local inspection.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    counters: Mutex<HashMap<String, u64>>,
    histograms: Mutex<HashMap<String, Vec<f64>>>,
    gauges: Mutex<HashMap<String, f64>>,
}

impl InMemoryMetrics {
    pub fn counter(&self, name: &str) -> u64 {
        self.counters.lock().get(name).copied().unwrap_or(0)
    }

    pub fn histogram_count(&self, name: &str) -> usize {
        self.histograms.lock().get(name).map_or(0, Vec::len)
    }

    pub fn gauge(&self, name: &str) -> Option<f64> {
        self.gauges.lock().get(name).copied()
    }
}

impl MetricsSink for InMemoryMetrics {
    fn incr_counter(&self, name: &str, delta: u64) {
        *self.counters.lock().entry(name.to_string()).or_insert(0) += delta;
    }

    fn observe_histogram(&self, name: &str, value: f64) {
        self.histograms
            .lock()
            .entry(name.to_string())
            .or_default()
            .push(value);
    }

    fn set_gauge(&self, name: &str, value: f64) {
        self.gauges.lock().insert(name.to_string(), value);
    }
}

#[cfg(test)]
#[path = "metrics_tests.rs"]
mod tests;
