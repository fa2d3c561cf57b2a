//! Plain-data configuration consumed by the builder.
//!
//! File parsing and a general parameter-manager service are out of scope
//! (they belong to an external collaborator); these structs are what that
//! collaborator is expected to populate and hand to [`crate::builder`].

use std::time::Duration;

/// Backoff schedule applied by a worker after a retryable fire outcome.
/// Grounded on `greenfield::Worker::loop`'s `BackoffStrategy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStrategy {
    Linear,
    Exponential,
}

/// Tunables for every worker thread in the topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerConfig {
    /// How long a worker sleeps when the scheduler has no assignment for it.
    pub checkin_time: Duration,
    /// Initial backoff duration after the first retryable failure.
    pub initial_backoff_time: Duration,
    /// Maximum number of retries before giving the arrow back to the scheduler.
    pub backoff_tries: u32,
    pub backoff_strategy: BackoffStrategy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            checkin_time: Duration::from_millis(200),
            initial_backoff_time: Duration::from_micros(100),
            backoff_tries: 4,
            backoff_strategy: BackoffStrategy::Exponential,
        }
    }
}

impl WorkerConfig {
    pub fn with_checkin_time(mut self, d: Duration) -> Self {
        self.checkin_time = d;
        self
    }

    pub fn with_initial_backoff_time(mut self, d: Duration) -> Self {
        self.initial_backoff_time = d;
        self
    }

    pub fn with_backoff_tries(mut self, n: u32) -> Self {
        self.backoff_tries = n;
        self
    }

    pub fn with_backoff_strategy(mut self, s: BackoffStrategy) -> Self {
        self.backoff_strategy = s;
        self
    }
}

/// Per-queue capacity and NUMA-partitioning parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    /// Number of independently-locked locations the queue is partitioned into.
    pub locations: usize,
    /// Soft threshold above which `push` reports `Full`.
    pub threshold: usize,
    /// Whether an empty location may steal from another location.
    pub enable_work_stealing: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfig {
            locations: 1,
            threshold: 256,
            enable_work_stealing: true,
        }
    }
}

impl QueueConfig {
    pub fn with_locations(mut self, n: usize) -> Self {
        self.locations = n.max(1);
        self
    }

    pub fn with_threshold(mut self, n: usize) -> Self {
        self.threshold = n;
        self
    }

    pub fn with_work_stealing(mut self, enabled: bool) -> Self {
        self.enable_work_stealing = enabled;
        self
    }
}

/// Per-pool capacity parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub locations: usize,
    /// Soft cap on live events per location.
    pub capacity_per_location: usize,
    /// If true, `acquire` beyond capacity returns `Status::Full` rather than
    /// growing the pool.
    pub strict: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            locations: 1,
            capacity_per_location: 16,
            strict: true,
        }
    }
}

impl PoolConfig {
    pub fn with_locations(mut self, n: usize) -> Self {
        self.locations = n.max(1);
        self
    }

    pub fn with_capacity_per_location(mut self, n: usize) -> Self {
        self.capacity_per_location = n;
        self
    }

    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }
}

/// Topology-wide settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TopologyConfig {
    pub worker: WorkerConfig,
    pub num_workers: usize,
    pub error_policy: crate::error::ErrorPolicy,
    /// NUMA-domain count workers are bound round-robin to (`worker_id %
    /// locations`). Should match the `locations` used when constructing
    /// this topology's queues and pools.
    pub locations: usize,
}

impl TopologyConfig {
    pub fn new(num_workers: usize) -> Self {
        TopologyConfig {
            worker: WorkerConfig::default(),
            num_workers: num_workers.max(1),
            error_policy: crate::error::ErrorPolicy::default(),
            locations: 1,
        }
    }

    pub fn with_worker_config(mut self, w: WorkerConfig) -> Self {
        self.worker = w;
        self
    }

    pub fn with_error_policy(mut self, p: crate::error::ErrorPolicy) -> Self {
        self.error_policy = p;
        self
    }

    pub fn with_locations(mut self, n: usize) -> Self {
        self.locations = n.max(1);
        self
    }
}
