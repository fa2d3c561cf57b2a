//! Assembles arrows, queues, and pools into a runnable [`Topology`].
//!
//! Grounded on `JTopologyBuilder`
//! (`examples/original_source/src/libraries/JANA/Topology/JTopologyBuilder.h`):
//! the builder only records the graph shape (arrows plus explicit
//! upstream edges) and hands it to the [`crate::scheduler::Scheduler`];
//! it does not itself run anything.

use std::sync::Arc;
use std::time::Duration;

use crate::arrow::Arrow;
use crate::config::TopologyConfig;
use crate::error::Result;
use crate::metrics::{ArrowMetricsSnapshot, WorkerMetricsSnapshot};
use crate::pool::Pool;
use crate::scheduler::{ArrowStatus, Scheduler, TopologyStatus};
use crate::worker::WorkerPool;

/// Handle to an arrow registered with a [`TopologyBuilder`], used to wire
/// up downstream arrows' `upstream` lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrowId(usize);

/// Accumulates arrows, their upstream edges, and the pools that need a
/// finalize hook at shutdown.
pub struct TopologyBuilder {
    config: TopologyConfig,
    arrows: Vec<Arc<dyn Arrow>>,
    downstream: Vec<Vec<usize>>,
    upstream_counts: Vec<usize>,
    pools: Vec<Pool>,
}

impl TopologyBuilder {
    pub fn new(config: TopologyConfig) -> Self {
        TopologyBuilder {
            config,
            arrows: Vec::new(),
            downstream: Vec::new(),
            upstream_counts: Vec::new(),
            pools: Vec::new(),
        }
    }

    /// Registers a pool so its `finalize` hook runs alongside every
    /// arrow's during `finish_topology` (§11.5).
    pub fn add_pool(&mut self, pool: Pool) -> &mut Self {
        self.pools.push(pool);
        self
    }

    /// Registers an arrow with explicit upstream edges. Source arrows pass
    /// an empty `upstream` slice.
    pub fn add_arrow(&mut self, arrow: Arc<dyn Arrow>, upstream: &[ArrowId]) -> ArrowId {
        let id = self.arrows.len();
        self.arrows.push(arrow);
        self.downstream.push(Vec::new());
        self.upstream_counts.push(upstream.len());
        for u in upstream {
            self.downstream[u.0].push(id);
        }
        ArrowId(id)
    }

    pub fn build(self) -> Topology {
        let scheduler = Arc::new(Scheduler::new(self.arrows, self.downstream, self.upstream_counts));
        let workers = WorkerPool::new(scheduler.clone(), self.config.worker, self.config.error_policy, self.config.locations);
        Topology {
            scheduler,
            pools: self.pools,
            workers,
            config: self.config,
        }
    }
}

/// The assembled, runnable dataflow graph. Owns the scheduler, the
/// registered pools, and the worker threads currently fed by it.
pub struct Topology {
    scheduler: Arc<Scheduler>,
    pools: Vec<Pool>,
    workers: WorkerPool,
    config: TopologyConfig,
}

impl Topology {
    pub fn builder(config: TopologyConfig) -> TopologyBuilder {
        TopologyBuilder::new(config)
    }

    /// Calls `initialize` on every arrow, once.
    pub fn initialize(&self) -> Result<()> {
        self.scheduler.initialize_topology()
    }

    /// Activates every source arrow (and everything downstream of it) and
    /// spawns `num_workers` worker threads.
    pub fn run(&mut self) -> Result<()> {
        self.scheduler.run_topology()?;
        self.workers.scale_up(self.config.num_workers);
        Ok(())
    }

    pub fn status(&self) -> TopologyStatus {
        self.scheduler.topology_status()
    }

    pub fn arrow_status(&self, id: ArrowId) -> ArrowStatus {
        self.scheduler.arrow_status(id.0)
    }

    pub fn arrow_metrics(&self, id: ArrowId) -> ArrowMetricsSnapshot {
        self.scheduler.arrow(id.0).metrics().snapshot()
    }

    pub fn worker_metrics(&self) -> Vec<WorkerMetricsSnapshot> {
        self.workers.metrics()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Adds or removes worker threads to reach `target`, per §5's "number
    /// of worker threads... may be rescaled at runtime".
    pub fn rescale_workers(&mut self, target: usize) {
        let current = self.workers.len();
        if target > current {
            self.workers.scale_up(target - current);
        } else if target < current {
            self.workers.scale_down(current - target);
        }
    }

    /// Marks every running arrow Pausing; workers finish their current
    /// fires and idle out cooperatively (§4.4).
    pub fn request_pause(&self) {
        self.scheduler.request_topology_pause();
    }

    /// Pauses sources only, letting in-flight events drain through.
    pub fn drain(&self) {
        self.scheduler.drain_topology();
    }

    /// Shuts down every worker thread, then calls `finalize` on every
    /// arrow and pool. After this the topology cannot restart.
    pub fn finish(&mut self) -> Result<()> {
        self.workers.shutdown_all();
        self.scheduler.finish_topology(&self.pools)
    }

    /// Blocks the calling thread until the topology reaches `Paused` or
    /// `Finalized`, polling every `poll_interval`. A convenience for tests
    /// and simple embedders; a real application would instead watch
    /// [`Topology::status`] from its own event loop.
    pub fn wait_until_paused(&self, poll_interval: Duration) {
        loop {
            match self.status() {
                TopologyStatus::Paused | TopologyStatus::Finalized => return,
                _ => std::thread::sleep(poll_interval),
            }
        }
    }
}
