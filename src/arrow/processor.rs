//! The map/tap (processor) arrow: one input queue, either a forwarding
//! output queue (map) or the originating pool (tap, a sink).
//!
//! Grounded on `JEventProcessorArrow`
//! (`examples/original_source/src/libraries/JANA/Topology/JEventProcessorArrow.h`).

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;

use crate::callbacks::Processor;
use crate::error::Result;
use crate::event::EventHandle;
use crate::metrics::{ArrowMetrics, FireStatus};
use crate::queue::{Queue, QueueStatus};

use super::{lift, Arrow, FireOutcome};

/// Where a processed event goes next.
pub enum ProcessorOutput {
    /// Forward the (possibly mutated) event downstream — a "map".
    Forward(Queue<EventHandle>),
    /// Observe only; dropping the handle here returns the event toward its
    /// pool once every other reference has also been released — a "tap".
    /// Per invariant (4), a tap's output port is always the same pool the
    /// event's source drew it from, so there is nothing to push to here.
    Tap,
}

pub struct ProcessorArrow {
    name: String,
    input: Queue<EventHandle>,
    output: ProcessorOutput,
    processor: Mutex<Box<dyn Processor>>,
    last_run: AtomicI64,
    metrics: ArrowMetrics,
}

impl ProcessorArrow {
    pub fn new(
        name: impl Into<String>,
        input: Queue<EventHandle>,
        output: ProcessorOutput,
        processor: Box<dyn Processor>,
    ) -> Self {
        ProcessorArrow {
            name: name.into(),
            input,
            output,
            processor: Mutex::new(processor),
            last_run: AtomicI64::new(i64::MIN),
            metrics: ArrowMetrics::new(),
        }
    }

    fn maybe_begin_run(&self, handle: &EventHandle) -> Result<()> {
        let run = handle.run_number();
        let previous = self.last_run.swap(run, Ordering::AcqRel);
        if previous == run {
            return Ok(());
        }
        if previous != i64::MIN {
            let result = self.processor.lock().end_run();
            lift("Processor::end_run", handle, result)?;
        }
        let result = handle.with(|event| self.processor.lock().begin_run(event));
        lift("Processor::begin_run", handle, result)
    }
}

impl Arrow for ProcessorArrow {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_parallel(&self) -> bool {
        true
    }

    fn is_sink(&self) -> bool {
        matches!(self.output, ProcessorOutput::Tap)
    }

    fn initialize(&self) -> Result<()> {
        self.processor
            .lock()
            .init()
            .map_err(|e| super::wrap_user_error_bare("Processor::init", e))
    }

    fn fire(&self, location: usize) -> Result<FireOutcome> {
        let start = Instant::now();
        let (handle, in_status) = self.input.pop_one_with_stealing(location);
        let handle = match handle {
            Some(h) => h,
            None => {
                let outcome = match in_status {
                    QueueStatus::Congested => FireOutcome::ComeBackLater,
                    _ => FireOutcome::ComeBackLater,
                };
                self.metrics
                    .record(FireStatus::ComeBackLater, 0, start.elapsed(), std::time::Duration::ZERO);
                return Ok(outcome);
            }
        };

        self.maybe_begin_run(&handle)?;

        let latency_start = Instant::now();
        let result = handle.with(|event| self.processor.lock().process(event));
        let latency = latency_start.elapsed();
        lift("Processor::process", &handle, result)?;

        let queue_start = Instant::now();
        let outcome = match &self.output {
            ProcessorOutput::Forward(out) => match out.push(std::iter::once(handle), location) {
                QueueStatus::Ready => FireOutcome::KeepGoing,
                QueueStatus::Full | QueueStatus::Congested | QueueStatus::Empty => FireOutcome::ComeBackLater,
            },
            ProcessorOutput::Tap => {
                drop(handle);
                FireOutcome::KeepGoing
            }
        };
        let overhead = queue_start.elapsed();

        let fire_status = if outcome == FireOutcome::KeepGoing {
            FireStatus::KeepGoing
        } else {
            FireStatus::ComeBackLater
        };
        self.metrics.record(fire_status, 1, latency, overhead);
        Ok(outcome)
    }

    fn finalize(&self) -> Result<()> {
        self.processor
            .lock()
            .finish()
            .map_err(|e| super::wrap_user_error_bare("Processor::finish", e))
    }

    fn input_is_empty(&self) -> bool {
        self.input.total_size() == 0
    }

    fn metrics(&self) -> &ArrowMetrics {
        &self.metrics
    }
}
