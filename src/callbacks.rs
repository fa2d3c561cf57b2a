//! The five extension points external collaborators implement (§6).
//!
//! These traits are the only surface through which user code enters the
//! core. Construction of implementors, and any service-locator/parameter-
//! manager/logger plumbing they need, is left to the builder's caller —
//! the core only ever holds a `Box<dyn Trait>` it was handed.
//!
//! Callbacks return [`UserResult`] rather than the crate's own
//! [`crate::error::Result`]: user exceptions are opaque to the core, which
//! only wraps them with component/event context (`CoreError::UserCallback`)
//! at the arrow boundary, per §7.

use crate::event::Event;

/// The error type a user callback may fail with. Opaque to the core beyond
/// `std::error::Error`; wrapped with call-site context when it crosses into
/// `CoreError::UserCallback`.
pub type UserError = Box<dyn std::error::Error + Send + Sync>;
pub type UserResult<T> = std::result::Result<T, UserError>;

/// Outcome of a source's `emit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceStatus {
    Success,
    FailureTryAgainLater,
    FailureFinished,
}

/// Produces events by calling into external I/O (file readers, simulators,
/// network feeds). `open`/`close` bracket the source's lifetime; `emit` is
/// called once per fire.
pub trait Source: Send {
    fn open(&mut self) -> UserResult<()> {
        Ok(())
    }

    fn close(&mut self) -> UserResult<()> {
        Ok(())
    }

    /// Fills `event` in place. Returning `FailureFinished` retires the
    /// source's arrow permanently; `FailureTryAgainLater` is retried with
    /// worker backoff.
    fn emit(&mut self, event: &mut Event) -> UserResult<SourceStatus>;
}

/// Observes events without transforming them (a "tap"). Implements the
/// standard component lifecycle (`init`/`begin_run`/`end_run`/`finish`)
/// alongside the per-event `process`.
pub trait Processor: Send {
    fn init(&mut self) -> UserResult<()> {
        Ok(())
    }

    fn begin_run(&mut self, _event: &Event) -> UserResult<()> {
        Ok(())
    }

    fn process(&mut self, event: &Event) -> UserResult<()>;

    fn end_run(&mut self) -> UserResult<()> {
        Ok(())
    }

    fn finish(&mut self) -> UserResult<()> {
        Ok(())
    }
}

/// Outcome of an unfolder's per-(parent, child) decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnfoldStatus {
    /// Release the current parent and draw a fresh one next fire, keeping
    /// this child to be retried against it. Nothing is emitted to
    /// child-out for this fire.
    KeepChildNextParent,
    /// Emit this child (tagged with the current parent) and draw a fresh
    /// child next fire, keeping the current parent.
    NextChildKeepParent,
    /// Emit this child (tagged with the current parent), release the
    /// parent, and draw a fresh parent and a fresh child next fire.
    NextChildNextParent,
}

/// Splits one parent event into a sequence of children, pairing each with
/// the parent via a user decision per (parent, child, index).
pub trait Unfolder: Send {
    fn init(&mut self) -> UserResult<()> {
        Ok(())
    }

    fn begin_run(&mut self, _parent: &Event) -> UserResult<()> {
        Ok(())
    }

    fn unfold(&mut self, parent: &Event, child: &mut Event, index: usize) -> UserResult<UnfoldStatus>;

    fn end_run(&mut self) -> UserResult<()> {
        Ok(())
    }

    fn finish(&mut self) -> UserResult<()> {
        Ok(())
    }
}

/// Folds one child event's results back into its parent. Optional: a fold
/// arrow with no folder simply passes children through without calling
/// into user code (see `arrow::fold`).
pub trait Folder: Send {
    fn init(&mut self) -> UserResult<()> {
        Ok(())
    }

    fn fold(&mut self, child: &Event, parent: &mut Event) -> UserResult<()>;

    fn finish(&mut self) -> UserResult<()> {
        Ok(())
    }
}
