//! Worker threads: the loop that requests an assignment from the
//! scheduler, fires the assigned arrow repeatedly, and reports back.
//!
//! Grounded on `greenfield::Worker`
//! (`examples/original_source/src/libraries/JANA/Engine/JWorker.h`, the
//! "greenfield" rewrite referenced in the original's own comments): a
//! plain OS thread looping on scheduler checkin/checkout, no coroutines,
//! no async runtime (§5 "Scheduling model").

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::arrow::FireOutcome;
use crate::config::{BackoffStrategy, WorkerConfig};
use crate::error::{CoreError, ErrorPolicy};
use crate::metrics::{WorkerMetrics, WorkerMetricsSnapshot};
use crate::scheduler::Scheduler;

/// How finely a backoff/idle sleep is chopped up so a shutdown request is
/// noticed promptly instead of after the full sleep duration (§5
/// "Cancellation").
const SLEEP_GRANULARITY: Duration = Duration::from_millis(5);

fn sleep_cancellable(duration: Duration, shutdown: &AtomicBool) {
    let mut remaining = duration;
    while remaining > Duration::ZERO {
        if shutdown.load(Ordering::Acquire) {
            return;
        }
        let chunk = remaining.min(SLEEP_GRANULARITY);
        std::thread::sleep(chunk);
        remaining = remaining.saturating_sub(chunk);
    }
}

/// A single worker's OS thread handle, shutdown flag, and merged metrics.
pub struct Worker {
    id: usize,
    thread: Option<std::thread::JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    metrics: Arc<WorkerMetrics>,
}

impl Worker {
    fn spawn(id: usize, scheduler: Arc<Scheduler>, config: WorkerConfig, error_policy: ErrorPolicy, locations: usize) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let metrics = Arc::new(WorkerMetrics::new());
        let shutdown_for_thread = shutdown.clone();
        let metrics_for_thread = metrics.clone();
        let location = id % locations.max(1);
        let thread = std::thread::Builder::new()
            .name(format!("flowcore-worker-{id}"))
            .spawn(move || run(id, location, scheduler, config, error_policy, shutdown_for_thread, metrics_for_thread))
            .expect("failed to spawn worker thread");
        Worker {
            id,
            thread: Some(thread),
            shutdown,
            metrics,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Signals the worker to stop after its current fire and check-in one
    /// final time via `last_assignment`. Does not block; call [`Worker::join`]
    /// afterward to wait for the thread to actually exit.
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    pub fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }

    pub fn metrics(&self) -> WorkerMetricsSnapshot {
        self.metrics.snapshot()
    }
}

fn run(
    _id: usize,
    location: usize,
    scheduler: Arc<Scheduler>,
    config: WorkerConfig,
    error_policy: ErrorPolicy,
    shutdown: Arc<AtomicBool>,
    metrics: Arc<WorkerMetrics>,
) {
    let mut previous: Option<(usize, FireOutcome)> = None;

    loop {
        if shutdown.load(Ordering::Acquire) {
            scheduler.last_assignment(previous);
            return;
        }

        let checkout_start = Instant::now();
        let assignment = scheduler.next_assignment(previous.take());
        let scheduler_time = checkout_start.elapsed();

        let idx = match assignment {
            Some(idx) => idx,
            None => {
                let idle_start = Instant::now();
                sleep_cancellable(config.checkin_time, &shutdown);
                metrics.update(Duration::ZERO, Duration::ZERO, scheduler_time, idle_start.elapsed(), 0);
                continue;
            }
        };

        let arrow = scheduler.arrow(idx).clone();
        let batch_start = Instant::now();
        let mut useful_time = Duration::ZERO;
        let mut retry_time = Duration::ZERO;
        let mut retries = 0u32;
        let mut backoff = config.initial_backoff_time;
        let outcome;

        loop {
            if shutdown.load(Ordering::Acquire) {
                outcome = FireOutcome::ComeBackLater;
                break;
            }

            let span = tracing::debug_span!("arrow_fire", arrow = arrow.name());
            let _enter = span.enter();
            let fire_start = Instant::now();
            let result = arrow.fire(location);

            match result {
                Ok(FireOutcome::KeepGoing) | Ok(FireOutcome::NotRunYet) => {
                    useful_time += fire_start.elapsed();
                    retries = 0;
                    backoff = config.initial_backoff_time;
                    if batch_start.elapsed() >= config.checkin_time {
                        outcome = FireOutcome::KeepGoing;
                        break;
                    }
                }
                Ok(FireOutcome::Finished) => {
                    useful_time += fire_start.elapsed();
                    outcome = FireOutcome::Finished;
                    break;
                }
                Ok(FireOutcome::ComeBackLater) => {
                    retry_time += fire_start.elapsed();
                    retries += 1;
                    if retries > config.backoff_tries {
                        outcome = FireOutcome::ComeBackLater;
                        break;
                    }
                    let sleep_start = Instant::now();
                    sleep_cancellable(backoff, &shutdown);
                    retry_time += sleep_start.elapsed();
                    backoff = match config.backoff_strategy {
                        BackoffStrategy::Linear => backoff + config.initial_backoff_time,
                        BackoffStrategy::Exponential => backoff * 2,
                    };
                }
                Err(CoreError::UserCallback { component, event_run, event_number, source }) if error_policy == ErrorPolicy::Tolerate => {
                    tracing::warn!(
                        arrow = arrow.name(),
                        component,
                        event_run,
                        event_number,
                        error = %source,
                        "tolerated user callback error"
                    );
                    retries += 1;
                    if retries > config.backoff_tries {
                        outcome = FireOutcome::ComeBackLater;
                        break;
                    }
                }
                Err(err) => {
                    tracing::error!(arrow = arrow.name(), error = %err, "fatal error firing arrow, requesting topology pause");
                    scheduler.request_topology_pause();
                    outcome = FireOutcome::ComeBackLater;
                    break;
                }
            }
        }

        metrics.update(useful_time, retry_time, scheduler_time, Duration::ZERO, retries as u64);
        previous = Some((idx, outcome));
    }
}

/// A rescalable pool of [`Worker`]s backing one running topology.
pub struct WorkerPool {
    scheduler: Arc<Scheduler>,
    config: WorkerConfig,
    error_policy: ErrorPolicy,
    locations: usize,
    workers: Vec<Worker>,
    next_id: usize,
}

impl WorkerPool {
    pub(crate) fn new(scheduler: Arc<Scheduler>, config: WorkerConfig, error_policy: ErrorPolicy, locations: usize) -> Self {
        WorkerPool {
            scheduler,
            config,
            error_policy,
            locations,
            workers: Vec::new(),
            next_id: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Adds `n` new worker threads, for rescaling up at runtime.
    pub fn scale_up(&mut self, n: usize) {
        for _ in 0..n {
            let worker = Worker::spawn(self.next_id, self.scheduler.clone(), self.config, self.error_policy, self.locations);
            self.next_id += 1;
            self.workers.push(worker);
        }
    }

    /// Requests shutdown on and joins `n` workers, for rescaling down at
    /// runtime (or full shutdown with `n = self.len()`).
    pub fn scale_down(&mut self, n: usize) {
        let n = n.min(self.workers.len());
        for worker in self.workers.drain(self.workers.len() - n..) {
            worker.request_shutdown();
            worker.join();
        }
    }

    pub fn shutdown_all(&mut self) {
        self.scale_down(self.workers.len());
    }

    pub fn metrics(&self) -> Vec<WorkerMetricsSnapshot> {
        self.workers.iter().map(Worker::metrics).collect()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown_all();
    }
}
