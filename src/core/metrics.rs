//! Metrics sink implementations.
//!
//! Scheduler components report counters, gauges and timers through a
//! [`MetricsHandler`]. Reporting is fire-and-forget: a sink must never block
//! or fail the caller.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;

/// Tasks accepted by a scheduler.
pub const TASK_SUBMITTED: &str = "task_submitted";
/// Tasks handed from a scheduler channel (or the fast path) to the processor.
pub const TASK_DISPATCHED: &str = "task_dispatched";
/// Dispatches deferred by a rate limiter denial.
pub const TASK_DEFERRED: &str = "task_deferred";
/// Tasks discarded with `abort`.
pub const TASK_ABORTED: &str = "task_aborted";
/// `execute` calls that returned an error or panicked.
pub const TASK_EXECUTION_FAILED: &str = "task_execution_failed";
/// `execute` calls that returned successfully.
pub const TASK_EXECUTION_COMPLETED: &str = "task_execution_completed";
/// Priority classes handed out by the priority assigner.
pub const TASK_PRIORITY_ASSIGNED: &str = "task_priority_assigned";
/// Pending tasks across all scheduler channels.
pub const CHANNEL_PENDING: &str = "channel_pending";
/// Time a task spent in its channel before dispatch.
pub const DISPATCH_LATENCY: &str = "dispatch_latency";
/// Live worker threads in a processor.
pub const WORKER_COUNT: &str = "worker_count";

/// Key/value pair attached to a metric.
pub type Tag = (&'static str, String);

/// Metrics sink abstraction.
pub trait MetricsHandler: Send + Sync {
    /// Add `delta` to a counter.
    fn counter(&self, name: &'static str, delta: u64, tags: &[Tag]);
    /// Set a gauge.
    fn gauge(&self, name: &'static str, value: f64, tags: &[Tag]);
    /// Record a duration.
    fn timer(&self, name: &'static str, elapsed: Duration, tags: &[Tag]);
}

/// Sink that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetricsHandler;

impl MetricsHandler for NoopMetricsHandler {
    fn counter(&self, _name: &'static str, _delta: u64, _tags: &[Tag]) {}
    fn gauge(&self, _name: &'static str, _value: f64, _tags: &[Tag]) {}
    fn timer(&self, _name: &'static str, _elapsed: Duration, _tags: &[Tag]) {}
}

#[derive(Default)]
struct Recorded {
    counters: HashMap<String, u64>,
    gauges: HashMap<String, f64>,
    timers: HashMap<String, Vec<Duration>>,
}

/// In-memory sink for testing and dev.
///
/// Metrics are keyed by name, with tags rendered as `name{k=v,...}` in the
/// order given. Lookups with an empty tag list aggregate across all tags.
#[derive(Default)]
pub struct InMemoryMetricsHandler {
    recorded: Mutex<Recorded>,
}

impl InMemoryMetricsHandler {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Counter total for `name` with exactly `tags`, or summed over all tag
    /// sets when `tags` is empty.
    pub fn counter_value(&self, name: &str, tags: &[Tag]) -> u64 {
        let recorded = self.recorded.lock();
        if tags.is_empty() {
            return recorded
                .counters
                .iter()
                .filter(|(key, _)| metric_name(key) == name)
                .map(|(_, value)| *value)
                .sum();
        }
        recorded
            .counters
            .get(&series_key(name, tags))
            .copied()
            .unwrap_or(0)
    }

    /// Last value set on a gauge.
    pub fn gauge_value(&self, name: &str, tags: &[Tag]) -> Option<f64> {
        self.recorded.lock().gauges.get(&series_key(name, tags)).copied()
    }

    /// Number of durations recorded for `name` across all tag sets.
    pub fn timer_count(&self, name: &str) -> usize {
        self.recorded
            .lock()
            .timers
            .iter()
            .filter(|(key, _)| metric_name(key) == name)
            .map(|(_, values)| values.len())
            .sum()
    }
}

impl MetricsHandler for InMemoryMetricsHandler {
    fn counter(&self, name: &'static str, delta: u64, tags: &[Tag]) {
        let mut recorded = self.recorded.lock();
        *recorded.counters.entry(series_key(name, tags)).or_insert(0) += delta;
    }

    fn gauge(&self, name: &'static str, value: f64, tags: &[Tag]) {
        self.recorded.lock().gauges.insert(series_key(name, tags), value);
    }

    fn timer(&self, name: &'static str, elapsed: Duration, tags: &[Tag]) {
        self.recorded
            .lock()
            .timers
            .entry(series_key(name, tags))
            .or_default()
            .push(elapsed);
    }
}

fn series_key(name: &str, tags: &[Tag]) -> String {
    if tags.is_empty() {
        return name.to_string();
    }
    let rendered: Vec<String> = tags.iter().map(|(k, v)| format!("{k}={v}")).collect();
    format!("{name}{{{}}}", rendered.join(","))
}

fn metric_name(key: &str) -> &str {
    key.split('{').next().unwrap_or(key)
}
