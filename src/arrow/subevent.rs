//! Optional sub-event split/merge: a lighter-weight alternative to
//! unfold/fold for splitting N sub-items of a *single* parent into N
//! independent units of work without drawing from a child-level pool.
//!
//! Grounded on `JSubeventArrow`/`JSubeventProcessor`
//! (`examples/original_source/src/libraries/JANA/Topology/JSubeventArrow.h`):
//! split hands out lightweight wrapper messages (a back-pointer to the
//! parent plus a sequence number / total count) rather than pooled events,
//! since sub-events don't need their own FactorySet or lifecycle — they're
//! just a unit of parallel work against one shared parent.

use std::collections::HashMap;
use std::time::Instant;

use parking_lot::Mutex;

use crate::callbacks::UserResult;
use crate::error::Result;
use crate::event::{Event, EventHandle};
use crate::metrics::{ArrowMetrics, FireStatus};
use crate::queue::Queue;

use super::{lift, Arrow, FireOutcome, ReleaseOutput};

/// A unit of parallel work: a strong reference to the parent plus enough
/// bookkeeping for the merge arrow to know when every sibling has been
/// processed.
pub struct SubeventWrapper {
    pub parent: EventHandle,
    pub index: usize,
    pub total: usize,
}

/// User computation run once per sub-item, independent of its siblings.
/// Not one of §6's five named extension points (sub-event split/merge is
/// itself optional), but the same shape: plain `init`/`finish` lifecycle
/// bracketing a per-call `process`.
pub trait SubeventProcessor: Send {
    fn init(&mut self) -> UserResult<()> {
        Ok(())
    }

    fn process(&mut self, parent: &Event, index: usize) -> UserResult<()>;

    fn finish(&mut self) -> UserResult<()> {
        Ok(())
    }
}

/// Splits one parent event into `count_of(parent)` wrapper messages.
pub struct SplitArrow {
    name: String,
    input: Queue<EventHandle>,
    output: Queue<SubeventWrapper>,
    count_of: Box<dyn Fn(&Event) -> usize + Send + Sync>,
    metrics: ArrowMetrics,
}

impl SplitArrow {
    pub fn new(
        name: impl Into<String>,
        input: Queue<EventHandle>,
        output: Queue<SubeventWrapper>,
        count_of: Box<dyn Fn(&Event) -> usize + Send + Sync>,
    ) -> Self {
        SplitArrow {
            name: name.into(),
            input,
            output,
            count_of,
            metrics: ArrowMetrics::new(),
        }
    }
}

impl Arrow for SplitArrow {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_parallel(&self) -> bool {
        true
    }

    fn fire(&self, location: usize) -> Result<FireOutcome> {
        let start = Instant::now();
        let (parent, _status) = self.input.pop_one_with_stealing(location);
        let parent = match parent {
            Some(p) => p,
            None => {
                self.metrics.record(FireStatus::ComeBackLater, 0, start.elapsed(), std::time::Duration::ZERO);
                return Ok(FireOutcome::ComeBackLater);
            }
        };

        let total = parent.with(|e| (self.count_of)(e));
        let wrappers: Vec<SubeventWrapper> = (0..total)
            .map(|index| SubeventWrapper { parent: parent.clone(), index, total })
            .collect();
        drop(parent);

        self.output.push(wrappers, location);
        self.metrics.record(FireStatus::KeepGoing, total as u64, start.elapsed(), std::time::Duration::ZERO);
        Ok(FireOutcome::KeepGoing)
    }

    fn input_is_empty(&self) -> bool {
        self.input.total_size() == 0
    }

    fn metrics(&self) -> &ArrowMetrics {
        &self.metrics
    }
}

/// The parallel middle arrow: processes each wrapper independently against
/// its shared parent and forwards it on to the merge arrow.
pub struct SubeventArrow {
    name: String,
    input: Queue<SubeventWrapper>,
    output: Queue<SubeventWrapper>,
    processor: Mutex<Box<dyn SubeventProcessor>>,
    metrics: ArrowMetrics,
}

impl SubeventArrow {
    pub fn new(
        name: impl Into<String>,
        input: Queue<SubeventWrapper>,
        output: Queue<SubeventWrapper>,
        processor: Box<dyn SubeventProcessor>,
    ) -> Self {
        SubeventArrow {
            name: name.into(),
            input,
            output,
            processor: Mutex::new(processor),
            metrics: ArrowMetrics::new(),
        }
    }
}

impl Arrow for SubeventArrow {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_parallel(&self) -> bool {
        true
    }

    fn initialize(&self) -> Result<()> {
        self.processor
            .lock()
            .init()
            .map_err(|e| super::wrap_user_error_bare("SubeventProcessor::init", e))
    }

    fn fire(&self, location: usize) -> Result<FireOutcome> {
        let start = Instant::now();
        let (wrapper, _status) = self.input.pop_one_with_stealing(location);
        let wrapper = match wrapper {
            Some(w) => w,
            None => {
                self.metrics.record(FireStatus::ComeBackLater, 0, start.elapsed(), std::time::Duration::ZERO);
                return Ok(FireOutcome::ComeBackLater);
            }
        };

        let result = wrapper.parent.with(|p| self.processor.lock().process(p, wrapper.index));
        lift("SubeventProcessor::process", &wrapper.parent, result)?;

        self.output.push(std::iter::once(wrapper), location);
        self.metrics.record(FireStatus::KeepGoing, 1, start.elapsed(), std::time::Duration::ZERO);
        Ok(FireOutcome::KeepGoing)
    }

    fn finalize(&self) -> Result<()> {
        self.processor
            .lock()
            .finish()
            .map_err(|e| super::wrap_user_error_bare("SubeventProcessor::finish", e))
    }

    fn input_is_empty(&self) -> bool {
        self.input.total_size() == 0
    }

    fn metrics(&self) -> &ArrowMetrics {
        &self.metrics
    }
}

/// Maintains a `parent -> remaining count` table; when a parent's count
/// reaches zero it is released to `output`.
pub struct MergeArrow {
    name: String,
    input: Queue<SubeventWrapper>,
    output: ReleaseOutput,
    remaining: Mutex<HashMap<usize, (EventHandle, usize)>>,
    metrics: ArrowMetrics,
}

impl MergeArrow {
    pub fn new(name: impl Into<String>, input: Queue<SubeventWrapper>, output: ReleaseOutput) -> Self {
        MergeArrow {
            name: name.into(),
            input,
            output,
            remaining: Mutex::new(HashMap::new()),
            metrics: ArrowMetrics::new(),
        }
    }
}

impl Arrow for MergeArrow {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_parallel(&self) -> bool {
        true
    }

    fn is_sink(&self) -> bool {
        matches!(self.output, ReleaseOutput::ReleaseToPool)
    }

    fn fire(&self, location: usize) -> Result<FireOutcome> {
        let start = Instant::now();
        let (wrapper, _status) = self.input.pop_one_with_stealing(location);
        let wrapper = match wrapper {
            Some(w) => w,
            None => {
                self.metrics.record(FireStatus::ComeBackLater, 0, start.elapsed(), std::time::Duration::ZERO);
                return Ok(FireOutcome::ComeBackLater);
            }
        };

        let key = wrapper.parent.identity();
        let completed = {
            let mut table = self.remaining.lock();
            let entry = table
                .entry(key)
                .or_insert_with(|| (wrapper.parent.clone(), wrapper.total));
            entry.1 -= 1;
            if entry.1 == 0 {
                table.remove(&key).map(|(handle, _)| handle)
            } else {
                None
            }
        };
        drop(wrapper);

        let emitted = if let Some(parent) = completed {
            match &self.output {
                ReleaseOutput::ReleaseToPool => drop(parent),
                ReleaseOutput::Forward(queue) => {
                    queue.push(std::iter::once(parent), location);
                }
            }
            1
        } else {
            0
        };

        self.metrics.record(FireStatus::KeepGoing, emitted, start.elapsed(), std::time::Duration::ZERO);
        Ok(FireOutcome::KeepGoing)
    }

    fn input_is_empty(&self) -> bool {
        self.input.total_size() == 0 && self.remaining.lock().is_empty()
    }

    fn metrics(&self) -> &ArrowMetrics {
        &self.metrics
    }
}
