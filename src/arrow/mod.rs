//! Dataflow processing stages.
//!
//! Grounded on `JArrow` (`examples/original_source/src/libraries/JANA/Topology/JArrow.h`).
//! Per the design notes, the original's deep inheritance tree (`JArrow` ->
//! `JEventSourceArrow`/`JEventMapArrow`/`JUnfoldArrow`/... ) is replaced
//! with a narrow trait and a small closed set of concrete structs; the
//! scheduler dispatches through `dyn Arrow` rather than down a class
//! hierarchy.

pub mod fold;
pub mod processor;
pub mod source;
pub mod subevent;
pub mod unfold;

pub use fold::FoldArrow;
pub use processor::ProcessorArrow;
pub use source::SourceArrow;
pub use subevent::{MergeArrow, SplitArrow, SubeventArrow, SubeventProcessor, SubeventWrapper};
pub use unfold::UnfoldArrow;

use crate::callbacks::{UserError, UserResult};
use crate::error::{CoreError, Result};
use crate::event::EventHandle;
use crate::metrics::ArrowMetrics;

/// Outcome of one `fire()`. Named and ordered to match the original's
/// `JArrowMetrics::Status` (`NotRunYet`/`KeepGoing`/`ComeBackLater`/`Finished`)
/// exactly, since the scheduler's termination-propagation logic (§4.4)
/// switches on precisely these four values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireOutcome {
    NotRunYet,
    KeepGoing,
    ComeBackLater,
    Finished,
}

/// A stage of the dataflow graph: a human-readable name, flags describing
/// how the scheduler may assign it, and one operation, `fire`, invoked by a
/// worker holding it.
///
/// `fire` takes `&self`, not `&mut self`: parallel arrows are fired
/// concurrently by multiple workers, so any internal mutable state (e.g.
/// `UnfoldArrow`'s held parent/child) lives behind its own lock rather than
/// behind `&mut`. Non-parallel arrows rely on the scheduler never handing
/// them to more than one worker at a time (§5) rather than on borrow
/// checking.
pub trait Arrow: Send + Sync {
    fn name(&self) -> &str;

    /// May this arrow be fired by more than one worker concurrently?
    fn is_parallel(&self) -> bool;

    /// Does this arrow activate the topology (a source)?
    fn is_source(&self) -> bool {
        false
    }

    /// Does this arrow count toward "events completed" (a sink)?
    fn is_sink(&self) -> bool {
        false
    }

    /// Idempotent; called exactly once by the scheduler before any fire.
    fn initialize(&self) -> Result<()> {
        Ok(())
    }

    /// Executes one unit of work.
    fn fire(&self, location: usize) -> Result<FireOutcome>;

    /// Idempotent; called exactly once by the scheduler after the last fire.
    fn finalize(&self) -> Result<()> {
        Ok(())
    }

    /// Whether this arrow currently has no pending input (its input queue,
    /// and any internally-held partial state, is empty). Sources default to
    /// `true` — they are never finalized by the upstream/queue-empty
    /// mechanism, only by an explicit `Finished` fire outcome (§4.4).
    /// Consulted by the scheduler's termination cascade, never by workers.
    fn input_is_empty(&self) -> bool {
        true
    }

    fn metrics(&self) -> &ArrowMetrics;
}

/// Where a released parent (fold) or completed sub-event group (merge)
/// goes: straight back to its own pool (a drop achieves this automatically
/// via [`EventHandle`]'s refcounted recycling), or forwarded to a further
/// queue for another arrow to consume.
pub enum ReleaseOutput {
    ReleaseToPool,
    Forward(crate::queue::Queue<EventHandle>),
}

/// Wraps a user callback error with the arrow/event context the core is
/// required to attach (§7's "User-code-exception").
pub(crate) fn wrap_user_error(component: &'static str, handle: &EventHandle, err: UserError) -> CoreError {
    let (run, number) = handle.with(|e| (e.run_number(), e.event_number()));
    CoreError::UserCallback {
        component,
        event_run: run,
        event_number: number,
        source: err,
    }
}

pub(crate) fn lift<T>(component: &'static str, handle: &EventHandle, result: UserResult<T>) -> Result<T> {
    result.map_err(|e| wrap_user_error(component, handle, e))
}

/// Like [`wrap_user_error`], for lifecycle hooks (`open`/`close`/`init`/
/// `finish`) that run outside the context of any particular event.
pub(crate) fn wrap_user_error_bare(component: &'static str, err: UserError) -> CoreError {
    CoreError::UserCallback {
        component,
        event_run: 0,
        event_number: 0,
        source: err,
    }
}
