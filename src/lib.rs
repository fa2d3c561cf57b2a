//! Core dataflow runtime for multi-threaded event processing.
//!
//! Routes a large, possibly unbounded sequence of events through a
//! user-supplied pipeline of producers, transformers, and consumers at the
//! highest achievable throughput on a multi-core host. Three subsystems
//! make up the core:
//!
//! - [`event`] / [`event::factory`] — the typed, lazily-computed object
//!   store inside every event.
//! - [`queue`] / [`pool`] — bounded, NUMA-partitioned mailboxes and
//!   recyclable event arenas.
//! - [`arrow`] / [`scheduler`] / [`worker`] — the dataflow graph and the
//!   centralized, work-stealing-style dispatcher that drives it.
//!
//! [`builder::Topology`] assembles the three into a runnable graph.
//!
//! Out of scope (see `SPEC_FULL.md` §1): the CLI entry point,
//! configuration-file parsing, the plugin loader, concrete I/O adapters,
//! the interactive inspector, and any specific user component beyond its
//! interface in [`callbacks`].

pub mod arrow;
pub mod builder;
pub mod callbacks;
pub mod config;
pub mod error;
pub mod event;
pub mod level;
pub mod metrics;
pub mod pool;
pub mod queue;
pub mod scheduler;
pub mod worker;

pub use arrow::{Arrow, FireOutcome};
pub use builder::{ArrowId, Topology, TopologyBuilder};
pub use callbacks::{Folder, Processor, Source, SourceStatus, UnfoldStatus, Unfolder};
pub use config::{BackoffStrategy, PoolConfig, QueueConfig, TopologyConfig, WorkerConfig};
pub use error::{CoreError, ErrorPolicy, Result};
pub use event::{Event, EventHandle, FactoryFlags, FactorySet};
pub use level::Level;
pub use pool::Pool;
pub use queue::Queue;
pub use scheduler::{ArrowStatus, TopologyStatus};
