//! The source arrow: no input queue, input port is a pool at its own level.
//!
//! Grounded on `JEventSourceArrow`
//! (`examples/original_source/src/libraries/JANA/Topology/JEventSourceArrow.h`).

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use parking_lot::Mutex;

use crate::callbacks::{Source, SourceStatus};
use crate::error::Result;
use crate::event::EventHandle;
use crate::metrics::{ArrowMetrics, FireStatus};
use crate::pool::{AcquireStatus, Pool};
use crate::queue::{Queue, QueueStatus};

use super::{lift, Arrow, FireOutcome};

/// Produces events via a user [`Source`] and pushes them to `output`.
/// Non-parallel: a single `Mutex<Box<dyn Source>>` naturally serializes
/// fires, mirroring a source's typical backing (one file handle, one
/// socket) being inherently sequential.
pub struct SourceArrow {
    name: String,
    pool: Pool,
    output: Queue<EventHandle>,
    source: Mutex<Box<dyn Source>>,
    metrics: ArrowMetrics,
    /// Set when the last emitted event was a barrier; cleared once the
    /// owning pool has fully drained. See `SPEC_FULL.md` §11.1 for why a
    /// full-pool drain, not a single-event refcount check, is used here.
    stalled_for_barrier: AtomicBool,
}

impl SourceArrow {
    pub fn new(name: impl Into<String>, pool: Pool, output: Queue<EventHandle>, source: Box<dyn Source>) -> Self {
        SourceArrow {
            name: name.into(),
            pool,
            output,
            source: Mutex::new(source),
            metrics: ArrowMetrics::new(),
            stalled_for_barrier: AtomicBool::new(false),
        }
    }
}

impl Arrow for SourceArrow {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_parallel(&self) -> bool {
        false
    }

    fn is_source(&self) -> bool {
        true
    }

    fn initialize(&self) -> Result<()> {
        self.source
            .lock()
            .open()
            .map_err(|e| super::wrap_user_error_bare("Source::open", e))
    }

    fn fire(&self, location: usize) -> Result<FireOutcome> {
        let start = Instant::now();

        if self.stalled_for_barrier.load(Ordering::Acquire) {
            if self.pool.available(location) == self.pool.constructed(location) {
                self.stalled_for_barrier.store(false, Ordering::Release);
            } else {
                self.metrics
                    .record(FireStatus::ComeBackLater, 0, start.elapsed(), std::time::Duration::ZERO);
                return Ok(FireOutcome::ComeBackLater);
            }
        }

        let handle = match self.pool.acquire(location) {
            AcquireStatus::Ready(h) => h,
            AcquireStatus::Empty => {
                self.metrics
                    .record(FireStatus::ComeBackLater, 0, start.elapsed(), std::time::Duration::ZERO);
                return Ok(FireOutcome::ComeBackLater);
            }
        };

        let emit_start = Instant::now();
        let status = {
            let mut source = self.source.lock();
            handle.with_mut(|event| source.emit(event))
        };
        let latency = emit_start.elapsed();

        let status = lift("Source::emit", &handle, status)?;

        let outcome = match status {
            SourceStatus::FailureTryAgainLater => {
                drop(handle);
                self.metrics.record(FireStatus::ComeBackLater, 0, latency, std::time::Duration::ZERO);
                FireOutcome::ComeBackLater
            }
            SourceStatus::FailureFinished => {
                drop(handle);
                self.metrics.record(FireStatus::Finished, 0, latency, std::time::Duration::ZERO);
                FireOutcome::Finished
            }
            SourceStatus::Success => {
                if handle.with(|e| e.is_barrier()) {
                    self.stalled_for_barrier.store(true, Ordering::Release);
                }
                let queue_start = Instant::now();
                let push_status = self.output.push(std::iter::once(handle), location);
                let overhead = queue_start.elapsed();
                let outcome = match push_status {
                    QueueStatus::Ready => FireOutcome::KeepGoing,
                    QueueStatus::Full | QueueStatus::Congested | QueueStatus::Empty => FireOutcome::ComeBackLater,
                };
                let fire_status = if outcome == FireOutcome::KeepGoing {
                    FireStatus::KeepGoing
                } else {
                    FireStatus::ComeBackLater
                };
                self.metrics.record(fire_status, 1, latency, overhead);
                outcome
            }
        };

        Ok(outcome)
    }

    fn finalize(&self) -> Result<()> {
        self.source
            .lock()
            .close()
            .map_err(|e| super::wrap_user_error_bare("Source::close", e))
    }

    fn metrics(&self) -> &ArrowMetrics {
        &self.metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PoolConfig, QueueConfig};

    struct BarrierSource {
        next: i64,
    }

    impl crate::callbacks::Source for BarrierSource {
        fn emit(&mut self, event: &mut crate::event::Event) -> crate::callbacks::UserResult<SourceStatus> {
            event.set_event_number(self.next);
            event.set_barrier(self.next == 2);
            self.next += 1;
            Ok(SourceStatus::Success)
        }
    }

    #[test]
    fn barrier_stalls_source_until_pool_fully_drains() {
        let pool = Pool::new(crate::level::Level::Event, PoolConfig::default().with_locations(1).with_capacity_per_location(2));
        let output: Queue<EventHandle> = Queue::new(QueueConfig::default().with_locations(1));
        let arrow = SourceArrow::new("source", pool.clone(), output.clone(), Box::new(BarrierSource { next: 1 }));

        // Event 1: not a barrier.
        assert_eq!(arrow.fire(0).unwrap(), FireOutcome::KeepGoing);
        // Event 2: a barrier; emitted, then the arrow stalls.
        assert_eq!(arrow.fire(0).unwrap(), FireOutcome::KeepGoing);
        // Neither event has been released yet, so the pool hasn't fully
        // drained: the source must stall rather than produce event 3.
        assert_eq!(arrow.fire(0).unwrap(), FireOutcome::ComeBackLater);

        // Downstream consumes and releases both events.
        let (items, _) = output.pop_range(0, 2, 2);
        assert_eq!(items.len(), 2);
        drop(items);
        assert_eq!(pool.available(0), pool.constructed(0));

        // The pool is fully idle again; the stall clears and event 3 is produced.
        assert_eq!(arrow.fire(0).unwrap(), FireOutcome::KeepGoing);
        let (third, _) = output.pop_one(0);
        assert_eq!(third.unwrap().event_number(), 3);
    }
}
