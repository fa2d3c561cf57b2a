//! A bounded, NUMA-partitioned arena of recyclable events.
//!
//! Grounded on `JMailbox`'s location-partitioned locking
//! (`examples/original_source/src/libraries/JANA/Topology/JMailbox.h`)
//! applied to event storage instead of queueing, plus the arena-of-events
//! design note (`SPEC_FULL.md` §9 / original spec §9): slots are allocated
//! once per location and never deallocated for the life of the pool: they
//! are recycled via [`crate::event::EventHandle`]'s refcounted drop.

use std::collections::VecDeque;
use std::sync::Arc;

use crossbeam_utils::CachePadded;
use parking_lot::Mutex;

use crate::config::PoolConfig;
use crate::event::{Event, EventHandle, Slot, SlotSink};
use crate::level::Level;

/// Outcome of [`Pool::acquire`].
#[derive(Debug)]
pub enum AcquireStatus {
    Ready(EventHandle),
    /// No free slot and the pool is at (or, in strict mode, over) capacity.
    Empty,
}

struct Location {
    slots: Mutex<Vec<Arc<Slot>>>,
    free: Mutex<VecDeque<usize>>,
}

impl Location {
    fn new() -> Self {
        Location {
            slots: Mutex::new(Vec::new()),
            free: Mutex::new(VecDeque::new()),
        }
    }
}

struct PoolInner {
    level: Level,
    config: PoolConfig,
    locations: Vec<CachePadded<Location>>,
}

impl SlotSink for PoolInner {
    fn release_slot(&self, location: usize, index: usize) {
        self.locations[location].free.lock().push_back(index);
    }
}

/// A bounded cache of constructed-but-reset events at one level, mirroring
/// `JMailbox`'s per-location partitioning but specialized to pool a single
/// recyclable event arena rather than a generic FIFO.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

impl Pool {
    pub fn new(level: Level, config: PoolConfig) -> Self {
        let locations = (0..config.locations.max(1))
            .map(|_| CachePadded::new(Location::new()))
            .collect();
        Pool {
            inner: Arc::new(PoolInner { level, config, locations }),
        }
    }

    pub fn level(&self) -> Level {
        self.inner.level
    }

    pub fn location_count(&self) -> usize {
        self.inner.locations.len()
    }

    /// Acquires a reset event from `location`, constructing a new one if
    /// the location's free list is empty and capacity allows.
    pub fn acquire(&self, location: usize) -> AcquireStatus {
        let location = location % self.inner.locations.len();
        let loc = &self.inner.locations[location];

        if let Some(index) = loc.free.lock().pop_front() {
            let slot = loc.slots.lock()[index].clone();
            slot.reset_refcount();
            let handle = EventHandle::new(slot, self.sink(), location, index, self.inner.level);
            return AcquireStatus::Ready(handle);
        }

        let mut slots = loc.slots.lock();
        if slots.len() < self.inner.config.capacity_per_location || !self.inner.config.strict {
            let index = slots.len();
            let event = Event::new_detached(0, 0, self.inner.level, 0);
            let slot = Arc::new(Slot::new(event));
            slots.push(slot.clone());
            drop(slots);
            let handle = EventHandle::new(slot, self.sink(), location, index, self.inner.level);
            return AcquireStatus::Ready(handle);
        }

        AcquireStatus::Empty
    }

    fn sink(&self) -> Arc<dyn SlotSink> {
        self.inner.clone() as Arc<dyn SlotSink>
    }

    /// Number of constructed (checked-out or idle) events at `location`.
    pub fn constructed(&self, location: usize) -> usize {
        self.inner.locations[location % self.inner.locations.len()].slots.lock().len()
    }

    /// Number of idle events available for immediate acquisition at `location`.
    pub fn available(&self, location: usize) -> usize {
        self.inner.locations[location % self.inner.locations.len()].free.lock().len()
    }

    pub fn capacity_per_location(&self) -> usize {
        self.inner.config.capacity_per_location
    }

    /// Drops every constructed slot, releasing any event still sitting idle
    /// in the pool. Called once from `finish_topology` alongside arrow
    /// finalization (see `SPEC_FULL.md` §11.5).
    pub fn finalize(&self) {
        for loc in &self.inner.locations {
            loc.slots.lock().clear();
            loc.free.lock().clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(cap: usize, strict: bool) -> PoolConfig {
        PoolConfig::default().with_locations(1).with_capacity_per_location(cap).with_strict(strict)
    }

    #[test]
    fn acquire_and_release_recycles_slot() {
        let pool = Pool::new(Level::Event, cfg(2, true));
        let h1 = match pool.acquire(0) {
            AcquireStatus::Ready(h) => h,
            AcquireStatus::Empty => panic!("expected Ready"),
        };
        assert_eq!(pool.constructed(0), 1);
        assert_eq!(pool.available(0), 0);
        drop(h1);
        assert_eq!(pool.available(0), 1);
        let _h2 = match pool.acquire(0) {
            AcquireStatus::Ready(h) => h,
            AcquireStatus::Empty => panic!("expected Ready"),
        };
        assert_eq!(pool.constructed(0), 1);
    }

    #[test]
    fn strict_pool_reports_empty_at_capacity() {
        let pool = Pool::new(Level::Event, cfg(1, true));
        let _h1 = match pool.acquire(0) {
            AcquireStatus::Ready(h) => h,
            AcquireStatus::Empty => panic!("expected Ready"),
        };
        match pool.acquire(0) {
            AcquireStatus::Empty => {}
            AcquireStatus::Ready(_) => panic!("expected Empty at capacity"),
        }
    }

    #[test]
    fn non_strict_pool_grows_past_capacity() {
        let pool = Pool::new(Level::Event, cfg(1, false));
        let _h1 = match pool.acquire(0) {
            AcquireStatus::Ready(h) => h,
            AcquireStatus::Empty => panic!("expected Ready"),
        };
        let _h2 = match pool.acquire(0) {
            AcquireStatus::Ready(h) => h,
            AcquireStatus::Empty => panic!("expected Ready beyond capacity"),
        };
        assert_eq!(pool.constructed(0), 2);
    }

    #[test]
    fn release_returns_handle_only_on_last_reference() {
        let pool = Pool::new(Level::Event, cfg(2, true));
        let h1 = match pool.acquire(0) {
            AcquireStatus::Ready(h) => h,
            AcquireStatus::Empty => panic!("expected Ready"),
        };
        let h2 = h1.clone();

        // Two references exist: releasing one must not report "last".
        assert!(h1.release().is_none());
        assert_eq!(pool.available(0), 0, "the slot is not recycled yet");

        // The second reference's release is the one that reaches zero and
        // gets the handle back instead of a silent pool recycle.
        let reclaimed = h2.release();
        assert!(reclaimed.is_some());
        assert_eq!(pool.available(0), 0, "the returned handle still holds the slot");
        drop(reclaimed);
        assert_eq!(pool.available(0), 1, "dropping the reclaimed handle finally recycles it");
    }
}
