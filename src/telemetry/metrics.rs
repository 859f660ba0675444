//! Engine counters.

use crate::result::OutcomeStatus;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Lock-free counters updated by producers and workers
#[derive(Debug)]
pub struct Metrics {
    tasks_submitted: AtomicU64,
    tasks_succeeded: AtomicU64,
    tasks_failed: AtomicU64,
    tasks_cancelled: AtomicU64,
    tasks_panicked: AtomicU64,
    // ran on a worker; orphans and cancellations never do
    tasks_executed: AtomicU64,

    busy_time_ns: AtomicU64,
    queue_wait_ns: AtomicU64,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            tasks_submitted: AtomicU64::new(0),
            tasks_succeeded: AtomicU64::new(0),
            tasks_failed: AtomicU64::new(0),
            tasks_cancelled: AtomicU64::new(0),
            tasks_panicked: AtomicU64::new(0),
            tasks_executed: AtomicU64::new(0),
            busy_time_ns: AtomicU64::new(0),
            queue_wait_ns: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_submit(&self) {
        self.tasks_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_outcome(&self, status: OutcomeStatus) {
        let counter = match status {
            OutcomeStatus::Success => &self.tasks_succeeded,
            OutcomeStatus::Failure => &self.tasks_failed,
            OutcomeStatus::Cancelled => &self.tasks_cancelled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_panic(&self) {
        self.tasks_panicked.fetch_add(1, Ordering::Relaxed);
    }

    /// Time a task sat in the queue and time it spent executing.
    pub fn record_execution(&self, queued: Duration, busy: Duration) {
        self.tasks_executed.fetch_add(1, Ordering::Relaxed);
        self.queue_wait_ns
            .fetch_add(queued.as_nanos() as u64, Ordering::Relaxed);
        self.busy_time_ns
            .fetch_add(busy.as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime: self.start_time.elapsed(),
            tasks_submitted: self.tasks_submitted.load(Ordering::Relaxed),
            tasks_succeeded: self.tasks_succeeded.load(Ordering::Relaxed),
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
            tasks_cancelled: self.tasks_cancelled.load(Ordering::Relaxed),
            tasks_panicked: self.tasks_panicked.load(Ordering::Relaxed),
            tasks_executed: self.tasks_executed.load(Ordering::Relaxed),
            busy_time_ns: self.busy_time_ns.load(Ordering::Relaxed),
            queue_wait_ns: self.queue_wait_ns.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub uptime: Duration,
    pub tasks_submitted: u64,
    pub tasks_succeeded: u64,
    pub tasks_failed: u64,
    pub tasks_cancelled: u64,
    /// Subset of `tasks_failed`.
    pub tasks_panicked: u64,
    /// Tasks that actually ran; the denominator of `avg_execution_ns`.
    pub tasks_executed: u64,
    pub busy_time_ns: u64,
    pub queue_wait_ns: u64,
}

impl MetricsSnapshot {
    /// Tasks with a terminal result.
    pub fn tasks_completed(&self) -> u64 {
        self.tasks_succeeded + self.tasks_failed + self.tasks_cancelled
    }

    /// Submitted but not yet resolved.
    pub fn tasks_in_flight(&self) -> u64 {
        self.tasks_submitted.saturating_sub(self.tasks_completed())
    }

    pub fn tasks_per_second(&self) -> f64 {
        let seconds = self.uptime.as_secs_f64();
        if seconds == 0.0 {
            return 0.0;
        }
        self.tasks_completed() as f64 / seconds
    }

    pub fn avg_execution_ns(&self) -> u64 {
        if self.tasks_executed == 0 {
            return 0;
        }
        self.busy_time_ns / self.tasks_executed
    }
}
