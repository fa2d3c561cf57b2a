//! The event: the unit of data routed through the topology.
//!
//! Events live in an arena owned by their [`crate::pool::Pool`]: the pool
//! keeps one permanent `Arc<Slot>` per slot for the lifetime of the
//! process, and hands out [`EventHandle`] clones that each bump a logical
//! refcount embedded in the slot. When the last handle drops, the event is
//! reset and its slot index is pushed back onto the pool's free list — it
//! is never deallocated. This sidesteps `Arc`'s inability to intercept
//! "last strong ref dropped" to redirect it at pool recycling instead of
//! `dealloc`, and rules out reference cycles structurally: a child only
//! ever holds a handle to a strictly-higher-level parent (see
//! [`crate::level::Level`]'s total order), so the graph can't loop back.

pub mod factory;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

pub use factory::{FactoryCallback, FactoryFlags, FactorySet};

use crate::error::{CoreError, Result};
use crate::level::Level;

/// The fundamental unit of flow. Carries identifiers, its level, an
/// event-local [`FactorySet`], and strong references to its parents (each
/// at a strictly higher level).
pub struct Event {
    run_number: i64,
    event_number: i64,
    level: Level,
    event_index: usize,
    factories: FactorySet,
    parents: Vec<EventHandle>,
    source_name: Option<String>,
    barrier: bool,
}

impl Event {
    /// Builds a standalone event not backed by any pool. Useful for unit
    /// tests exercising the FactorySet directly; production code obtains
    /// events exclusively through [`crate::pool::Pool::acquire`].
    pub fn new_detached(run_number: i64, event_number: i64, level: Level, event_index: usize) -> Self {
        Event {
            run_number,
            event_number,
            level,
            event_index,
            factories: FactorySet::new(level),
            parents: Vec::new(),
            source_name: None,
            barrier: false,
        }
    }

    pub fn run_number(&self) -> i64 {
        self.run_number
    }

    pub fn set_run_number(&mut self, run_number: i64) {
        self.run_number = run_number;
    }

    pub fn event_number(&self) -> i64 {
        self.event_number
    }

    pub fn set_event_number(&mut self, event_number: i64) {
        self.event_number = event_number;
    }

    pub fn level(&self) -> Level {
        self.level
    }

    pub fn event_index(&self) -> usize {
        self.event_index
    }

    pub fn set_event_index(&mut self, index: usize) {
        self.event_index = index;
    }

    pub fn source_name(&self) -> Option<&str> {
        self.source_name.as_deref()
    }

    pub fn set_source_name(&mut self, name: impl Into<String>) {
        self.source_name = Some(name.into());
    }

    /// Whether a source marked this event as a sequential barrier: source
    /// fires stall until the refcount on this specific event returns to
    /// zero (every downstream arrow has released it).
    pub fn is_barrier(&self) -> bool {
        self.barrier
    }

    pub fn set_barrier(&mut self, barrier: bool) {
        self.barrier = barrier;
    }

    pub fn factories(&self) -> &FactorySet {
        &self.factories
    }

    pub fn register_factory<T: 'static + Send + Sync>(
        &self,
        tag: impl Into<String>,
        flags: FactoryFlags,
        callback: Arc<dyn FactoryCallback<T>>,
    ) {
        self.factories.register(tag, flags, callback);
    }

    pub fn insert<T: 'static + Send + Sync>(&self, tag: impl Into<String>, objects: Vec<T>) {
        self.factories.insert(tag, objects);
    }

    /// Get-or-compute at this event's own level.
    pub fn get<T: 'static + Send + Sync>(&self, tag: &str) -> Result<Arc<Vec<T>>> {
        self.get_at_level(self.level, tag)
    }

    /// Get-single at this event's own level.
    pub fn get_single<T: 'static + Send + Sync>(&self, tag: &str) -> Result<Option<Arc<Vec<T>>>> {
        self.get_single_at_level(self.level, tag)
    }

    /// Get-single-strict at this event's own level.
    pub fn get_single_strict<T: 'static + Send + Sync>(&self, tag: &str) -> Result<Arc<Vec<T>>> {
        self.get_single_strict_at_level(self.level, tag)
    }

    /// Get-or-compute at an arbitrary level: redirects to the parent event
    /// at `level` unless `level` is this event's own level.
    pub fn get_at_level<T: 'static + Send + Sync>(&self, level: Level, tag: &str) -> Result<Arc<Vec<T>>> {
        if level == self.level {
            return self.factories.get_or_compute::<T>(self, tag);
        }
        let parent = self.parent_at(level)?;
        parent.with(|p| p.get_at_level::<T>(level, tag))
    }

    pub fn get_single_at_level<T: 'static + Send + Sync>(
        &self,
        level: Level,
        tag: &str,
    ) -> Result<Option<Arc<Vec<T>>>> {
        let objs = self.get_at_level::<T>(level, tag)?;
        Ok(if objs.is_empty() { None } else { Some(objs) })
    }

    pub fn get_single_strict_at_level<T: 'static + Send + Sync>(
        &self,
        level: Level,
        tag: &str,
    ) -> Result<Arc<Vec<T>>> {
        if level == self.level {
            return self.factories.get_single_strict::<T>(self, tag);
        }
        let parent = self.parent_at(level)?;
        parent.with(|p| p.get_single_strict_at_level::<T>(level, tag))
    }

    /// The held parent reference at exactly `level`, if any.
    pub fn parent_at(&self, level: Level) -> Result<&EventHandle> {
        self.parents
            .iter()
            .find(|p| p.level() == level)
            .ok_or(CoreError::NoParentAtLevel { level })
    }

    pub fn parents(&self) -> &[EventHandle] {
        &self.parents
    }

    /// Adds a strong parent reference. The caller must already hold a
    /// handle to `parent` (typically via `.clone()`) — this takes ownership
    /// of it rather than cloning internally, since callers sometimes want to
    /// keep their own copy and sometimes want to hand it off outright.
    pub fn add_parent(&mut self, parent: EventHandle) {
        self.parents.push(parent);
    }

    /// Removes and returns the held parent reference at `level`, if any.
    /// Dropping the returned handle is what may cascade the parent back to
    /// its own pool, per invariant (3).
    pub fn release_parent_at(&mut self, level: Level) -> Option<EventHandle> {
        let pos = self.parents.iter().position(|p| p.level() == level)?;
        Some(self.parents.remove(pos))
    }

    fn reset_for_pool(&mut self) {
        self.factories.reset();
        self.parents.clear();
        self.source_name = None;
        self.barrier = false;
    }
}

/// Object-safe hook a pool implements to reclaim a slot once its logical
/// refcount drops to zero. Kept as a trait so [`EventHandle`] doesn't need
/// to name [`crate::pool::Pool`] concretely (pool.rs depends on this
/// module, not the other way around).
pub(crate) trait SlotSink: Send + Sync {
    fn release_slot(&self, location: usize, index: usize);
}

pub(crate) struct Slot {
    data: Mutex<Event>,
    refcount: AtomicUsize,
}

impl Slot {
    pub(crate) fn new(event: Event) -> Self {
        Slot {
            data: Mutex::new(event),
            refcount: AtomicUsize::new(1),
        }
    }

    /// Re-arms a recycled slot's logical refcount to 1. Called by the pool
    /// right before handing out a freshly-popped slot from its free list.
    pub(crate) fn reset_refcount(&self) {
        self.refcount.store(1, Ordering::Release);
    }
}

/// A live reference to a pooled event. Clone to add a strong reference
/// (bumps the logical refcount); drop to release one. When the last handle
/// is dropped the event is reset and its slot recycled — see the module
/// documentation.
pub struct EventHandle {
    slot: Arc<Slot>,
    sink: Arc<dyn SlotSink>,
    location: usize,
    index: usize,
    level: Level,
    /// Set by [`EventHandle::release`] once it has already performed the
    /// handle's logical-refcount decrement by hand, so `Drop` knows not to
    /// decrement a second time. Never touched by more than one thread: a
    /// handle is owned by exactly one thread at a time, moving by value
    /// through queues/pools rather than being shared.
    defused: bool,
}

impl EventHandle {
    pub(crate) fn new(slot: Arc<Slot>, sink: Arc<dyn SlotSink>, location: usize, index: usize, level: Level) -> Self {
        EventHandle {
            slot,
            sink,
            location,
            index,
            level,
            defused: false,
        }
    }

    pub fn level(&self) -> Level {
        self.level
    }

    pub fn location(&self) -> usize {
        self.location
    }

    /// A stable identity for this event's backing slot, usable as a map
    /// key (e.g. the merge arrow's per-parent remaining-count table). Not
    /// meant to outlive the handle it was read from.
    pub fn identity(&self) -> usize {
        Arc::as_ptr(&self.slot) as usize
    }

    /// Current logical strong-reference count. Useful for tests and
    /// barrier-stall detection; not meant for control flow beyond that.
    pub fn strong_count(&self) -> usize {
        self.slot.refcount.load(Ordering::Acquire)
    }

    pub fn with<R>(&self, f: impl FnOnce(&Event) -> R) -> R {
        let data = self.slot.data.lock();
        f(&data)
    }

    pub fn with_mut<R>(&self, f: impl FnOnce(&mut Event) -> R) -> R {
        let mut data = self.slot.data.lock();
        f(&mut data)
    }

    pub fn run_number(&self) -> i64 {
        self.with(|e| e.run_number())
    }

    pub fn event_number(&self) -> i64 {
        self.with(|e| e.event_number())
    }

    /// Atomically decrements this handle's logical reference count,
    /// consuming it. If this decrement was the one that brought the count
    /// to zero, the handle is handed back with its refcount re-armed to 1
    /// instead of being reset and recycled the way an ordinary drop would
    /// — the caller now owns the sole remaining reference (e.g. to
    /// forward a fold arrow's parent onward) and is responsible for it.
    /// Otherwise returns `None`: the decrement has already taken full
    /// effect and there is nothing further to do.
    ///
    /// This is what lets a parallel fold arrow decide, without a race,
    /// which of several concurrent fires against siblings of the same
    /// parent is the one that must forward it — a plain
    /// `strong_count() == 1` check followed by a separate drop is a
    /// check-then-act race between sibling fires; this method performs
    /// both as one atomic step.
    pub fn release(mut self) -> Option<EventHandle> {
        self.defused = true;
        if self.slot.refcount.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.slot.refcount.store(1, Ordering::Release);
            Some(EventHandle {
                slot: self.slot.clone(),
                sink: self.sink.clone(),
                location: self.location,
                index: self.index,
                level: self.level,
                defused: false,
            })
        } else {
            None
        }
    }
}

impl Clone for EventHandle {
    fn clone(&self) -> Self {
        self.slot.refcount.fetch_add(1, Ordering::AcqRel);
        EventHandle {
            slot: self.slot.clone(),
            sink: self.sink.clone(),
            location: self.location,
            index: self.index,
            level: self.level,
            defused: false,
        }
    }
}

impl Drop for EventHandle {
    fn drop(&mut self) {
        if self.defused {
            return;
        }
        if self.slot.refcount.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.slot.data.lock().reset_for_pool();
            self.sink.release_slot(self.location, self.index);
        }
    }
}

impl std::fmt::Debug for EventHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHandle")
            .field("level", &self.level)
            .field("location", &self.location)
            .field("index", &self.index)
            .field("strong_count", &self.strong_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detached_event_basic_accessors() {
        let e = Event::new_detached(7, 42, Level::Event, 3);
        assert_eq!(e.run_number(), 7);
        assert_eq!(e.event_number(), 42);
        assert_eq!(e.level(), Level::Event);
        assert_eq!(e.event_index(), 3);
    }

    #[test]
    fn missing_parent_errors() {
        let e = Event::new_detached(1, 1, Level::SubEvent, 0);
        let err = e.parent_at(Level::Event).unwrap_err();
        assert!(matches!(err, CoreError::NoParentAtLevel { level: Level::Event }));
    }
}
