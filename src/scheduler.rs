//! The centralized assignment arbiter: hands arrow assignments to worker
//! threads on demand and tracks per-arrow activation state, propagating
//! quiescence through the graph as sources finish.
//!
//! Grounded on `JScheduler`
//! (`examples/original_source/src/libraries/JANA/Engine/JScheduler.h`):
//! one mutex guarding a round-robin cursor plus per-arrow state, exactly
//! the "per-worker checkin/checkout is O(arrows) but arrows are few"
//! design the original's comment justifies (§4.4 rationale).

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, trace};

use crate::arrow::{Arrow, FireOutcome};

/// Per-arrow lifecycle status (§3's `TopologyState`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrowStatus {
    Uninitialized,
    Active,
    Draining,
    Inactive,
    Finalized,
}

/// Topology-wide lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopologyStatus {
    Uninitialized,
    Running,
    Pausing,
    Draining,
    Paused,
    Finalized,
}

struct ArrowState {
    status: ArrowStatus,
    thread_count: usize,
    /// Count of upstream arrows still Active or Draining. Sources have no
    /// upstream at all (`has_upstream = false`) and are therefore immune to
    /// the upstream/queue-empty auto-finalize mechanism below — they are
    /// only finalized by an explicit `Finished` fire outcome (§4.4).
    upstream_active: usize,
    has_upstream: bool,
}

struct SchedulerState {
    arrows: Vec<ArrowState>,
    cursor: usize,
    active_or_draining: usize,
    status: TopologyStatus,
}

/// The topology's dataflow graph (for termination propagation) plus the
/// single mutex all checkin/checkout decisions serialize through.
pub struct Scheduler {
    arrows: Vec<Arc<dyn Arrow>>,
    downstream: Vec<Vec<usize>>,
    state: Mutex<SchedulerState>,
}

impl Scheduler {
    pub(crate) fn new(arrows: Vec<Arc<dyn Arrow>>, downstream: Vec<Vec<usize>>, upstream_counts: Vec<usize>) -> Self {
        let arrow_states = upstream_counts
            .iter()
            .map(|&n| ArrowState {
                status: ArrowStatus::Uninitialized,
                thread_count: 0,
                upstream_active: n,
                has_upstream: n > 0,
            })
            .collect();
        Scheduler {
            arrows,
            downstream,
            state: Mutex::new(SchedulerState {
                arrows: arrow_states,
                cursor: 0,
                active_or_draining: 0,
                status: TopologyStatus::Uninitialized,
            }),
        }
    }

    pub fn arrow_count(&self) -> usize {
        self.arrows.len()
    }

    pub fn arrow(&self, idx: usize) -> &Arc<dyn Arrow> {
        &self.arrows[idx]
    }

    pub fn arrow_status(&self, idx: usize) -> ArrowStatus {
        self.state.lock().arrows[idx].status
    }

    pub fn topology_status(&self) -> TopologyStatus {
        self.state.lock().status
    }

    /// Calls `initialize` on every arrow, once.
    pub fn initialize_topology(&self) -> crate::error::Result<()> {
        for arrow in &self.arrows {
            arrow.initialize()?;
        }
        let mut state = self.state.lock();
        if state.status == TopologyStatus::Uninitialized {
            state.status = TopologyStatus::Paused;
        }
        Ok(())
    }

    /// Activates every source arrow and, recursively, everything
    /// downstream of it, then sets the topology running.
    pub fn run_topology(&self) -> crate::error::Result<()> {
        let mut state = self.state.lock();
        if !self.arrows.iter().any(|a| a.is_source()) {
            return Err(crate::error::CoreError::NoEventSources);
        }
        for idx in 0..self.arrows.len() {
            if self.arrows[idx].is_source() {
                self.activate(&mut state, idx);
            }
        }
        state.status = TopologyStatus::Running;
        info!(active = state.active_or_draining, "topology running");
        Ok(())
    }

    fn activate(&self, state: &mut SchedulerState, idx: usize) {
        if state.arrows[idx].status != ArrowStatus::Uninitialized {
            return;
        }
        state.arrows[idx].status = ArrowStatus::Active;
        state.active_or_draining += 1;
        trace!(arrow = self.arrows[idx].name(), "activated");
        for &d in &self.downstream[idx] {
            self.activate(state, d);
        }
    }

    /// Checks in `previous` (if any) then checks out the next runnable
    /// arrow. Returns `None` if nothing is runnable right now; the caller
    /// (a worker) should sleep for its configured check-in interval.
    pub fn next_assignment(&self, previous: Option<(usize, FireOutcome)>) -> Option<usize> {
        let mut state = self.state.lock();
        if let Some((idx, outcome)) = previous {
            self.checkin(&mut state, idx, outcome);
        }
        self.checkout(&mut state)
    }

    /// Checks in `previous` with no checkout. Called exactly once per
    /// worker on shutdown.
    pub fn last_assignment(&self, previous: Option<(usize, FireOutcome)>) {
        let mut state = self.state.lock();
        if let Some((idx, outcome)) = previous {
            self.checkin(&mut state, idx, outcome);
        }
    }

    fn checkin(&self, state: &mut SchedulerState, idx: usize, outcome: FireOutcome) {
        {
            let st = &mut state.arrows[idx];
            st.thread_count = st.thread_count.saturating_sub(1);
        }

        if outcome == FireOutcome::Finished {
            self.finalize_arrow(state, idx);
        }

        self.evaluate(state, idx);
        self.maybe_autopause(state);
    }

    /// Transitions `idx` straight to `Finalized` (an explicit `Finished`
    /// outcome, or `drain_topology` stopping a source) and cascades the
    /// upstream-active decrement to its downstream arrows.
    fn finalize_arrow(&self, state: &mut SchedulerState, idx: usize) {
        let was_active = matches!(state.arrows[idx].status, ArrowStatus::Active | ArrowStatus::Draining);
        if state.arrows[idx].status == ArrowStatus::Finalized {
            return;
        }
        state.arrows[idx].status = ArrowStatus::Finalized;
        if was_active {
            state.active_or_draining = state.active_or_draining.saturating_sub(1);
        }
        debug!(arrow = self.arrows[idx].name(), "finalized");
        for &d in &self.downstream[idx] {
            state.arrows[d].upstream_active = state.arrows[d].upstream_active.saturating_sub(1);
            self.evaluate(state, d);
        }
    }

    /// Re-checks whether `idx` should transition to Draining or Finalized
    /// now that an upstream arrow or its own thread count has changed.
    /// No-op for arrows with no upstream (sources) — those only move via
    /// an explicit `Finished` outcome in [`Self::checkin`].
    fn evaluate(&self, state: &mut SchedulerState, idx: usize) {
        if !state.arrows[idx].has_upstream {
            return;
        }
        if state.arrows[idx].status == ArrowStatus::Finalized {
            return;
        }
        if state.arrows[idx].upstream_active != 0 {
            return;
        }
        if !self.arrows[idx].input_is_empty() {
            return;
        }
        if state.arrows[idx].thread_count == 0 {
            self.finalize_arrow(state, idx);
        } else if state.arrows[idx].status == ArrowStatus::Active {
            state.arrows[idx].status = ArrowStatus::Draining;
            debug!(arrow = self.arrows[idx].name(), "draining");
        }
    }

    fn maybe_autopause(&self, state: &mut SchedulerState) {
        let quiescing = matches!(
            state.status,
            TopologyStatus::Running | TopologyStatus::Pausing | TopologyStatus::Draining
        );
        if state.active_or_draining == 0 && quiescing {
            state.status = TopologyStatus::Paused;
            info!("topology auto-paused: no arrows active or draining");
        }
    }

    fn checkout(&self, state: &mut SchedulerState) -> Option<usize> {
        if !matches!(state.status, TopologyStatus::Running | TopologyStatus::Draining) {
            return None;
        }
        let n = self.arrows.len();
        if n == 0 {
            return None;
        }
        for offset in 0..n {
            let idx = (state.cursor + offset) % n;
            let st = &state.arrows[idx];
            if st.status == ArrowStatus::Active && (self.arrows[idx].is_parallel() || st.thread_count == 0) {
                state.arrows[idx].thread_count += 1;
                state.cursor = (idx + 1) % n;
                return Some(idx);
            }
        }
        None
    }

    /// Marks every running arrow Pausing (implemented as a topology-wide
    /// status so in-flight fires are left to complete cooperatively, per
    /// the open question recorded in `SPEC_FULL.md` §12 / §9(b)): no new
    /// assignments are checked out until `active_or_draining` drains to
    /// zero, at which point `maybe_autopause` flips to `Paused`.
    pub fn request_topology_pause(&self) {
        let mut state = self.state.lock();
        if state.status == TopologyStatus::Running {
            state.status = TopologyStatus::Pausing;
            info!("topology pause requested");
        }
    }

    /// Pauses sources only, letting in-flight events flow through to
    /// completion via the ordinary upstream/queue-empty cascade.
    pub fn drain_topology(&self) {
        let mut state = self.state.lock();
        state.status = TopologyStatus::Draining;
        for idx in 0..self.arrows.len() {
            if self.arrows[idx].is_source() && state.arrows[idx].status == ArrowStatus::Active {
                self.finalize_arrow(&mut state, idx);
            }
        }
        info!("topology draining: sources stopped");
    }

    /// Calls `finalize` on every arrow (once) and on every pool.
    pub fn finish_topology(&self, pools: &[crate::pool::Pool]) -> crate::error::Result<()> {
        for arrow in &self.arrows {
            arrow.finalize()?;
        }
        for pool in pools {
            pool.finalize();
        }
        let mut state = self.state.lock();
        state.status = TopologyStatus::Finalized;
        for st in &mut state.arrows {
            st.status = ArrowStatus::Finalized;
        }
        info!("topology finalized");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::ArrowMetrics;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubArrow {
        name: String,
        source: bool,
        parallel: bool,
        fires_before_finish: AtomicUsize,
        metrics: ArrowMetrics,
    }

    impl StubArrow {
        fn new(name: &str, source: bool, parallel: bool, fires_before_finish: usize) -> Self {
            StubArrow {
                name: name.to_string(),
                source,
                parallel,
                fires_before_finish: AtomicUsize::new(fires_before_finish),
                metrics: ArrowMetrics::new(),
            }
        }
    }

    impl Arrow for StubArrow {
        fn name(&self) -> &str {
            &self.name
        }
        fn is_parallel(&self) -> bool {
            self.parallel
        }
        fn is_source(&self) -> bool {
            self.source
        }
        fn fire(&self, _location: usize) -> crate::error::Result<FireOutcome> {
            let remaining = self.fires_before_finish.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
                Some(v.saturating_sub(1))
            });
            if remaining == Ok(0) {
                Ok(FireOutcome::Finished)
            } else {
                Ok(FireOutcome::KeepGoing)
            }
        }
        fn metrics(&self) -> &ArrowMetrics {
            &self.metrics
        }
    }

    fn build(source_fires: usize) -> Scheduler {
        let source: Arc<dyn Arrow> = Arc::new(StubArrow::new("source", true, false, source_fires));
        let sink: Arc<dyn Arrow> = Arc::new(StubArrow::new("sink", false, true, usize::MAX));
        Scheduler::new(vec![source, sink], vec![vec![1], vec![]], vec![0, 1])
    }

    #[test]
    fn run_topology_activates_source_and_downstream() {
        let sched = build(10);
        sched.initialize_topology().unwrap();
        sched.run_topology().unwrap();
        assert_eq!(sched.arrow_status(0), ArrowStatus::Active);
        assert_eq!(sched.arrow_status(1), ArrowStatus::Active);
        assert_eq!(sched.topology_status(), TopologyStatus::Running);
    }

    #[test]
    fn checkout_respects_non_parallel_in_flight() {
        let sched = build(10);
        sched.initialize_topology().unwrap();
        sched.run_topology().unwrap();
        let first = sched.next_assignment(None);
        assert_eq!(first, Some(0));
        // Source is non-parallel and already has a thread; the next
        // checkout (with no checkin of arrow 0) should skip it and go to
        // the sink instead.
        let second = sched.next_assignment(None);
        assert_eq!(second, Some(1));
    }

    #[test]
    fn source_finish_cascades_to_finalize_sink_once_drained() {
        let sched = build(1);
        sched.initialize_topology().unwrap();
        sched.run_topology().unwrap();

        let idx = sched.next_assignment(None).unwrap();
        assert_eq!(idx, 0);
        // Source finishes on its one fire.
        let next = sched.next_assignment(Some((0, FireOutcome::Finished)));
        assert_eq!(sched.arrow_status(0), ArrowStatus::Finalized);
        // Sink has no pending input (stub's input_is_empty defaults true)
        // and isn't held by any worker, so it finalizes immediately too.
        assert_eq!(sched.arrow_status(1), ArrowStatus::Finalized);
        assert_eq!(next, None);
        assert_eq!(sched.topology_status(), TopologyStatus::Paused);
    }

    #[test]
    fn finish_topology_finalizes_every_arrow() {
        let sched = build(10);
        sched.initialize_topology().unwrap();
        sched.run_topology().unwrap();
        sched.finish_topology(&[]).unwrap();
        assert_eq!(sched.arrow_status(0), ArrowStatus::Finalized);
        assert_eq!(sched.arrow_status(1), ArrowStatus::Finalized);
        assert_eq!(sched.topology_status(), TopologyStatus::Finalized);
    }
}
