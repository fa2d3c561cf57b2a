//! The unfold arrow: pairs one parent event with many children drawn from
//! a child-level pool, per user decision on each (parent, child, index).
//!
//! Grounded on `JUnfoldArrow`
//! (`examples/original_source/src/libraries/JANA/Topology/JUnfoldArrow.h`).
//! Non-parallel: children of one parent must be produced in order, and the
//! held parent/child slots are mutated by whichever single worker currently
//! owns this arrow (§5).

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;

use crate::callbacks::{UnfoldStatus, Unfolder};
use crate::error::Result;
use crate::event::EventHandle;
use crate::metrics::{ArrowMetrics, FireStatus};
use crate::pool::{AcquireStatus, Pool};
use crate::queue::Queue;

use super::{lift, Arrow, FireOutcome};

#[derive(Default)]
struct UnfoldState {
    parent: Option<EventHandle>,
    child: Option<EventHandle>,
    index: usize,
}

/// Four ports: parent-in (queue), child-in (pool at child level), child-out
/// (queue at child level). A fourth port, "rejected-parent-out", named in
/// spec.md as a distinct pool, turns out to be the same mechanism as an
/// ordinary release: dropping the held parent handle returns it to whatever
/// pool it was acquired from, whether or not any child was ever emitted for
/// it — so no separate port object is needed (see `DESIGN.md`).
pub struct UnfoldArrow {
    name: String,
    parent_in: Queue<EventHandle>,
    child_in: Pool,
    child_out: Queue<EventHandle>,
    unfolder: Mutex<Box<dyn Unfolder>>,
    state: Mutex<UnfoldState>,
    last_run: AtomicI64,
    metrics: ArrowMetrics,
}

impl UnfoldArrow {
    pub fn new(
        name: impl Into<String>,
        parent_in: Queue<EventHandle>,
        child_in: Pool,
        child_out: Queue<EventHandle>,
        unfolder: Box<dyn Unfolder>,
    ) -> Self {
        UnfoldArrow {
            name: name.into(),
            parent_in,
            child_in,
            child_out,
            unfolder: Mutex::new(unfolder),
            state: Mutex::new(UnfoldState::default()),
            last_run: AtomicI64::new(i64::MIN),
            metrics: ArrowMetrics::new(),
        }
    }

    fn maybe_begin_run(&self, parent: &EventHandle) -> Result<()> {
        let run = parent.run_number();
        let previous = self.last_run.swap(run, Ordering::AcqRel);
        if previous == run {
            return Ok(());
        }
        if previous != i64::MIN {
            let result = self.unfolder.lock().end_run();
            lift("Unfolder::end_run", parent, result)?;
        }
        let result = parent.with(|event| self.unfolder.lock().begin_run(event));
        lift("Unfolder::begin_run", parent, result)
    }
}

impl Arrow for UnfoldArrow {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_parallel(&self) -> bool {
        false
    }

    fn initialize(&self) -> Result<()> {
        self.unfolder
            .lock()
            .init()
            .map_err(|e| super::wrap_user_error_bare("Unfolder::init", e))
    }

    fn fire(&self, location: usize) -> Result<FireOutcome> {
        let start = Instant::now();
        let mut state = self.state.lock();

        if state.parent.is_none() {
            let (handle, _status) = self.parent_in.pop_one_with_stealing(location);
            match handle {
                Some(h) => {
                    self.maybe_begin_run(&h)?;
                    state.parent = Some(h);
                    state.index = 0;
                }
                None => {
                    self.metrics.record(FireStatus::ComeBackLater, 0, start.elapsed(), std::time::Duration::ZERO);
                    return Ok(FireOutcome::ComeBackLater);
                }
            }
        }

        if state.child.is_none() {
            match self.child_in.acquire(location) {
                AcquireStatus::Ready(h) => state.child = Some(h),
                AcquireStatus::Empty => {
                    self.metrics.record(FireStatus::ComeBackLater, 0, start.elapsed(), std::time::Duration::ZERO);
                    return Ok(FireOutcome::ComeBackLater);
                }
            }
        }

        let parent = state.parent.as_ref().expect("checked above").clone();
        let mut child = state.child.take().expect("checked above");
        let index = state.index;

        let status_result = parent.with(|p| child.with_mut(|c| self.unfolder.lock().unfold(p, c, index)));
        let status = lift("Unfolder::unfold", &parent, status_result)?;

        let (outcome, emitted) = match status {
            UnfoldStatus::KeepChildNextParent => {
                // The child is retained (not dropped) to be retried
                // against the next parent; only the current parent is
                // released. Releasing here is exactly dropping the held
                // handle: whether or not any other child already holds a
                // reference to this parent, its refcount mechanism alone
                // decides whether it recycles now or later.
                state.child = Some(child);
                drop(state.parent.take());
                (FireOutcome::KeepGoing, 0)
            }
            UnfoldStatus::NextChildKeepParent => {
                child.with_mut(|c| c.add_parent(parent.clone()));
                self.child_out.push(std::iter::once(child), location);
                state.child = None;
                state.index += 1;
                (FireOutcome::KeepGoing, 1)
            }
            UnfoldStatus::NextChildNextParent => {
                child.with_mut(|c| c.add_parent(parent.clone()));
                self.child_out.push(std::iter::once(child), location);
                drop(state.parent.take());
                state.child = None;
                (FireOutcome::KeepGoing, 1)
            }
        };

        let fire_status = match outcome {
            FireOutcome::KeepGoing => FireStatus::KeepGoing,
            _ => FireStatus::ComeBackLater,
        };
        self.metrics.record(fire_status, emitted, start.elapsed(), std::time::Duration::ZERO);
        Ok(outcome)
    }

    fn finalize(&self) -> Result<()> {
        self.unfolder
            .lock()
            .finish()
            .map_err(|e| super::wrap_user_error_bare("Unfolder::finish", e))
    }

    fn input_is_empty(&self) -> bool {
        let state = self.state.lock();
        state.parent.is_none() && state.child.is_none() && self.parent_in.total_size() == 0
    }

    fn metrics(&self) -> &ArrowMetrics {
        &self.metrics
    }
}
