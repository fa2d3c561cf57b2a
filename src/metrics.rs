//! Per-arrow and per-worker metrics accumulation.
//!
//! Grounded on the original's `JArrowMetrics` (per-arrow fire counts and
//! timing) and `greenfield::Worker::Metrics` (useful/retry/scheduler/idle
//! time), neither of which spec.md names explicitly but which its §8
//! scenarios assume exist (`events_processed`, retry counts).

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

/// Outcome of a single `fire()`, recorded for metrics purposes. Distinct
/// from [`crate::arrow::FireOutcome`] in that it's a simplified tri-state
/// used purely for bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireStatus {
    KeepGoing,
    ComeBackLater,
    Finished,
}

/// Atomic counters updated after every fire of a single arrow.
#[derive(Debug, Default)]
pub struct ArrowMetrics {
    total_fires: AtomicU64,
    total_events: AtomicU64,
    come_back_later_count: AtomicU64,
    total_latency_nanos: AtomicU64,
    total_queue_overhead_nanos: AtomicU64,
}

impl ArrowMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, status: FireStatus, events_emitted: u64, latency: Duration, overhead: Duration) {
        self.total_fires.fetch_add(1, Ordering::Relaxed);
        self.total_events.fetch_add(events_emitted, Ordering::Relaxed);
        if status == FireStatus::ComeBackLater {
            self.come_back_later_count.fetch_add(1, Ordering::Relaxed);
        }
        self.total_latency_nanos
            .fetch_add(latency.as_nanos() as u64, Ordering::Relaxed);
        self.total_queue_overhead_nanos
            .fetch_add(overhead.as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ArrowMetricsSnapshot {
        ArrowMetricsSnapshot {
            total_fires: self.total_fires.load(Ordering::Relaxed),
            total_events: self.total_events.load(Ordering::Relaxed),
            come_back_later_count: self.come_back_later_count.load(Ordering::Relaxed),
            total_latency: Duration::from_nanos(self.total_latency_nanos.load(Ordering::Relaxed)),
            total_queue_overhead: Duration::from_nanos(self.total_queue_overhead_nanos.load(Ordering::Relaxed)),
        }
    }
}

/// A point-in-time read of an arrow's accumulated metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrowMetricsSnapshot {
    pub total_fires: u64,
    pub total_events: u64,
    pub come_back_later_count: u64,
    pub total_latency: Duration,
    pub total_queue_overhead: Duration,
}

/// Per-worker timing buckets, merged into this struct under a single mutex
/// on each loop iteration. Mirrors `greenfield::Worker::Metrics` exactly:
/// useful time (inside user fires), retry time (backoff sleeps), scheduler
/// time (checkin/checkout), and idle time (no assignment available).
#[derive(Debug, Default)]
pub struct WorkerMetrics {
    inner: Mutex<WorkerMetricsInner>,
}

#[derive(Debug, Default, Clone, Copy)]
struct WorkerMetricsInner {
    useful_time: Duration,
    retry_time: Duration,
    scheduler_time: Duration,
    idle_time: Duration,
    retry_count: u64,
}

impl WorkerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, useful: Duration, retry: Duration, scheduler: Duration, idle: Duration, retries: u64) {
        let mut inner = self.inner.lock();
        inner.useful_time += useful;
        inner.retry_time += retry;
        inner.scheduler_time += scheduler;
        inner.idle_time += idle;
        inner.retry_count += retries;
    }

    pub fn snapshot(&self) -> WorkerMetricsSnapshot {
        let inner = *self.inner.lock();
        WorkerMetricsSnapshot {
            useful_time: inner.useful_time,
            retry_time: inner.retry_time,
            scheduler_time: inner.scheduler_time,
            idle_time: inner.idle_time,
            retry_count: inner.retry_count,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerMetricsSnapshot {
    pub useful_time: Duration,
    pub retry_time: Duration,
    pub scheduler_time: Duration,
    pub idle_time: Duration,
    pub retry_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arrow_metrics_accumulate() {
        let m = ArrowMetrics::new();
        m.record(FireStatus::KeepGoing, 1, Duration::from_millis(1), Duration::from_micros(5));
        m.record(FireStatus::ComeBackLater, 0, Duration::from_millis(1), Duration::from_micros(5));
        let snap = m.snapshot();
        assert_eq!(snap.total_fires, 2);
        assert_eq!(snap.total_events, 1);
        assert_eq!(snap.come_back_later_count, 1);
    }

    #[test]
    fn worker_metrics_merge() {
        let m = WorkerMetrics::new();
        m.update(Duration::from_millis(10), Duration::from_millis(2), Duration::from_micros(50), Duration::ZERO, 1);
        m.update(Duration::from_millis(5), Duration::ZERO, Duration::from_micros(20), Duration::from_millis(100), 0);
        let snap = m.snapshot();
        assert_eq!(snap.useful_time, Duration::from_millis(15));
        assert_eq!(snap.retry_count, 1);
        assert_eq!(snap.idle_time, Duration::from_millis(100));
    }
}
