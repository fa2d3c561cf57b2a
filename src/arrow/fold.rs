//! The fold arrow: the reverse of unfold — pops a child, optionally lets a
//! user callback merge its results into its parent, releases the child,
//! and forwards the parent onward once it was the child's last reference.
//!
//! Grounded on `JFoldArrow`
//! (`examples/original_source/src/libraries/JANA/Topology/JFoldArrow.h`).

use std::time::Instant;

use parking_lot::Mutex;

use crate::callbacks::Folder;
use crate::error::{CoreError, Result};
use crate::event::EventHandle;
use crate::level::Level;
use crate::metrics::{ArrowMetrics, FireStatus};
use crate::queue::Queue;

use super::{lift, Arrow, FireOutcome, ReleaseOutput};

/// Three ports: child-in (queue), child-out (its own pool, a plain handle
/// drop), parent-out (queue or pool, see [`ReleaseOutput`]).
///
/// Trivial (no folder) when the user supplies no folder, in which case the
/// arrow is a pure pass-through and safe to run in parallel — a real
/// folder mutates the shared parent under `&mut`, so those fires must be
/// serialized (§4.3).
pub struct FoldArrow {
    name: String,
    child_in: Queue<EventHandle>,
    parent_level: Level,
    folder: Option<Mutex<Box<dyn Folder>>>,
    output: ReleaseOutput,
    metrics: ArrowMetrics,
}

impl FoldArrow {
    pub fn new(
        name: impl Into<String>,
        child_in: Queue<EventHandle>,
        child_level: Level,
        folder: Option<Box<dyn Folder>>,
        output: ReleaseOutput,
    ) -> Self {
        let parent_level = child_level
            .parent_level()
            .expect("fold arrow's child level must have a parent level");
        FoldArrow {
            name: name.into(),
            child_in,
            parent_level,
            folder: folder.map(Mutex::new),
            output,
            metrics: ArrowMetrics::new(),
        }
    }
}

impl Arrow for FoldArrow {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_parallel(&self) -> bool {
        self.folder.is_none()
    }

    fn is_sink(&self) -> bool {
        matches!(self.output, ReleaseOutput::ReleaseToPool)
    }

    fn initialize(&self) -> Result<()> {
        if let Some(folder) = &self.folder {
            folder
                .lock()
                .init()
                .map_err(|e| super::wrap_user_error_bare("Folder::init", e))?;
        }
        Ok(())
    }

    fn fire(&self, location: usize) -> Result<FireOutcome> {
        let start = Instant::now();
        let (child, _status) = self.child_in.pop_one_with_stealing(location);
        let mut child = match child {
            Some(c) => c,
            None => {
                self.metrics.record(FireStatus::ComeBackLater, 0, start.elapsed(), std::time::Duration::ZERO);
                return Ok(FireOutcome::ComeBackLater);
            }
        };

        let parent_level = self.parent_level;
        let parent_handle = child
            .with_mut(|e| e.release_parent_at(parent_level))
            .ok_or_else(|| {
                CoreError::LifecycleViolation(format!(
                    "child event had no parent reference at level {parent_level}"
                ))
            })?;

        if let Some(folder) = &self.folder {
            let result = child.with(|ce| parent_handle.with_mut(|pe| folder.lock().fold(ce, pe)));
            lift("Folder::fold", &child, result)?;
        }

        drop(child);

        // `release` performs the decrement-and-test atomically: with a
        // parallel trivial fold, two workers can reach this point for two
        // siblings of the same parent at once, and only the one whose
        // decrement actually reaches zero gets the handle back. A plain
        // `strong_count() == 1` check followed by a separate drop would be
        // a check-then-act race between those workers (see `DESIGN.md`).
        let emitted = match parent_handle.release() {
            Some(parent_handle) => {
                match &self.output {
                    ReleaseOutput::ReleaseToPool => drop(parent_handle),
                    ReleaseOutput::Forward(queue) => {
                        queue.push(std::iter::once(parent_handle), location);
                    }
                }
                1
            }
            None => 0,
        };
        self.metrics.record(FireStatus::KeepGoing, emitted, start.elapsed(), std::time::Duration::ZERO);
        Ok(FireOutcome::KeepGoing)
    }

    fn finalize(&self) -> Result<()> {
        if let Some(folder) = &self.folder {
            folder
                .lock()
                .finish()
                .map_err(|e| super::wrap_user_error_bare("Folder::finish", e))?;
        }
        Ok(())
    }

    fn input_is_empty(&self) -> bool {
        self.child_in.total_size() == 0
    }

    fn metrics(&self) -> &ArrowMetrics {
        &self.metrics
    }
}
