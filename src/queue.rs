//! A bounded, NUMA-partitioned multi-producer/multi-consumer mailbox.
//!
//! Grounded directly on `JMailbox<T>`
//! (`examples/original_source/src/libraries/JANA/Topology/JMailbox.h`):
//! one independently-locked deque per location, `try_lock`-based congestion
//! detection, and a `Status` enum distinguishing transient contention
//! (`Congested`) from sustained overload (`Full`).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_utils::CachePadded;
use parking_lot::Mutex;

use crate::config::QueueConfig;

/// Outcome of a push or pop against one location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueStatus {
    Ready,
    /// The location's lock was contended; try a different location or retry.
    Congested,
    Empty,
    /// Push succeeded but the location is now at or above threshold.
    Full,
}

struct LocationQueue<T> {
    deque: Mutex<VecDeque<T>>,
}

impl<T> LocationQueue<T> {
    fn new() -> Self {
        LocationQueue { deque: Mutex::new(VecDeque::new()) }
    }
}

struct QueueInner<T> {
    threshold: AtomicUsize,
    config: QueueConfig,
    locations: Vec<CachePadded<LocationQueue<T>>>,
}

/// A bounded FIFO of items (events, or sub-event wrapper messages),
/// partitioned into independently-locked locations with optional
/// cross-location work stealing.
pub struct Queue<T> {
    inner: Arc<QueueInner<T>>,
}

impl<T> Clone for Queue<T> {
    fn clone(&self) -> Self {
        Queue { inner: self.inner.clone() }
    }
}

impl<T: Send> Queue<T> {
    pub fn new(config: QueueConfig) -> Self {
        let locations = (0..config.locations.max(1)).map(|_| CachePadded::new(LocationQueue::new())).collect();
        Queue {
            inner: Arc::new(QueueInner {
                threshold: AtomicUsize::new(config.threshold),
                config,
                locations,
            }),
        }
    }

    pub fn location_count(&self) -> usize {
        self.inner.locations.len()
    }

    pub fn threshold(&self) -> usize {
        self.inner.threshold.load(Ordering::Relaxed)
    }

    pub fn set_threshold(&self, threshold: usize) {
        self.inner.threshold.store(threshold, Ordering::Relaxed);
    }

    fn resolve(&self, location: usize) -> usize {
        location % self.inner.locations.len()
    }

    /// Pushes every item in `items` onto `location`'s deque. Returns `Full`
    /// if the post-push size is at or above threshold, else `Ready`.
    ///
    /// Unlike [`Queue::pop_range`], this blocks briefly for the location's
    /// lock rather than `try_lock`-ing: a push always carries ownership of
    /// live data (an `EventHandle`, in the common case), and per-location
    /// contention is microseconds (§5). A `try_lock`-and-drop-on-contention
    /// push would silently destroy in-flight events under load instead of
    /// merely delaying them, which is not what "Congested" is supposed to
    /// mean for push — see `DESIGN.md`. `Congested` therefore never occurs
    /// here; it remains a pop-only status where failing to acquire the lock
    /// loses nothing because nothing is consumed.
    pub fn push(&self, items: impl IntoIterator<Item = T>, location: usize) -> QueueStatus {
        let location = self.resolve(location);
        let mut guard = self.inner.locations[location].deque.lock();
        guard.extend(items);
        if guard.len() >= self.threshold() {
            QueueStatus::Full
        } else {
            QueueStatus::Ready
        }
    }

    /// Pops between `min` and `max` items from `location`. Returns `Empty`
    /// if fewer than `min` items are available (nothing is removed in that
    /// case), `Congested` on contention, else `Ready` if the location still
    /// has items left after the pop or `Empty` if it's now drained.
    pub fn pop_range(&self, location: usize, min: usize, max: usize) -> (Vec<T>, QueueStatus) {
        let location = self.resolve(location);
        match self.inner.locations[location].deque.try_lock() {
            None => (Vec::new(), QueueStatus::Congested),
            Some(mut guard) => {
                if guard.len() < min {
                    return (Vec::new(), QueueStatus::Empty);
                }
                let take = guard.len().min(max);
                let items: Vec<T> = guard.drain(..take).collect();
                let status = if guard.is_empty() { QueueStatus::Empty } else { QueueStatus::Ready };
                (items, status)
            }
        }
    }

    /// Pops exactly one item, if available.
    pub fn pop_one(&self, location: usize) -> (Option<T>, QueueStatus) {
        let (mut items, status) = self.pop_range(location, 1, 1);
        (items.pop(), status)
    }

    /// Like [`Queue::pop_one`], but if `location` is empty and work
    /// stealing is enabled, tries a randomly-chosen other location before
    /// giving up. Grounded on `work_stealing.rs`'s randomized victim
    /// selection (see `SPEC_FULL.md` §11.2): fixed scan order under
    /// contention causes a thundering herd, random order doesn't.
    pub fn pop_one_with_stealing(&self, location: usize) -> (Option<T>, QueueStatus) {
        let home = self.resolve(location);
        let (item, status) = self.pop_one(home);
        if item.is_some() {
            return (Some(item.unwrap()), status);
        }
        let n = self.inner.locations.len();
        if !self.inner.config.enable_work_stealing || n <= 1 {
            return (None, status);
        }
        let start = fastrand::usize(0..n);
        for offset in 0..n {
            let victim = (start + offset) % n;
            if victim == home {
                continue;
            }
            let (item, steal_status) = self.pop_one(victim);
            if item.is_some() {
                return (item, steal_status);
            }
        }
        (None, status)
    }

    pub fn size(&self, location: usize) -> usize {
        self.inner.locations[self.resolve(location)].deque.lock().len()
    }

    pub fn total_size(&self) -> usize {
        self.inner.locations.iter().map(|l| l.deque.lock().len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(locations: usize, threshold: usize) -> QueueConfig {
        QueueConfig::default().with_locations(locations).with_threshold(threshold)
    }

    #[test]
    fn push_pop_roundtrip() {
        let q: Queue<i32> = Queue::new(cfg(1, 100));
        assert_eq!(q.push(vec![1, 2, 3], 0), QueueStatus::Ready);
        let (items, status) = q.pop_range(0, 1, 2);
        assert_eq!(items, vec![1, 2]);
        assert_eq!(status, QueueStatus::Ready);
        let (item, status) = q.pop_one(0);
        assert_eq!(item, Some(3));
        assert_eq!(status, QueueStatus::Empty);
    }

    #[test]
    fn pop_below_min_reports_empty_without_removing() {
        let q: Queue<i32> = Queue::new(cfg(1, 100));
        q.push(vec![1], 0);
        let (items, status) = q.pop_range(0, 2, 2);
        assert!(items.is_empty());
        assert_eq!(status, QueueStatus::Empty);
        assert_eq!(q.size(0), 1);
    }

    #[test]
    fn push_past_threshold_reports_full() {
        let q: Queue<i32> = Queue::new(cfg(1, 2));
        assert_eq!(q.push(vec![1], 0), QueueStatus::Ready);
        assert_eq!(q.push(vec![2], 0), QueueStatus::Full);
    }

    #[test]
    fn work_stealing_finds_other_location() {
        let q: Queue<i32> = Queue::new(cfg(4, 100));
        q.push(vec![99], 2);
        let (item, _status) = q.pop_one_with_stealing(0);
        assert_eq!(item, Some(99));
    }

    #[test]
    fn work_stealing_disabled_stays_local() {
        let q: Queue<i32> = Queue::new(cfg(2, 100).with_work_stealing(false));
        q.push(vec![1], 1);
        let (item, status) = q.pop_one_with_stealing(0);
        assert_eq!(item, None);
        assert_eq!(status, QueueStatus::Empty);
    }
}
