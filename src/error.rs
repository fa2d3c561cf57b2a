//! Error types for the core dataflow runtime.

use std::fmt;

use crate::level::Level;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors the core can surface. Retryable conditions (Congested, Full,
/// TryAgainLater) are deliberately **not** variants here — they are ordinary
/// [`crate::arrow::FireOutcome`] values handled inside the worker loop, never
/// unwound as errors (see §7 of the design notes).
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("no factory registered for type `{type_name}` tag `{tag}`")]
    FactoryMissing { type_name: &'static str, tag: String },

    #[error("factory for type `{type_name}` tag `{tag}` produced a different type than requested")]
    FactoryTypeMismatch { type_name: &'static str, tag: String },

    #[error("expected exactly one object of type `{type_name}` tag `{tag}`, found {found}")]
    SingleObjectExpected {
        type_name: &'static str,
        tag: String,
        found: usize,
    },

    #[error("lifecycle violation: {0}")]
    LifecycleViolation(String),

    #[error("no parent event at level {level:?}")]
    NoParentAtLevel { level: Level },

    #[error("{component} raised an error processing run {event_run} event {event_number}: {source}")]
    UserCallback {
        component: &'static str,
        event_run: i64,
        event_number: i64,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("run_topology called with no event sources")]
    NoEventSources,

    #[error("factory dependency cycle detected at type `{type_name}` tag `{tag}`")]
    CycleDetected { type_name: &'static str, tag: String },
}

/// What to do when a [`CoreError::UserCallback`] surfaces from a fire.
///
/// Mirrors the "optional tolerance mode downgrades the exception to a logged
/// warning" behavior described for user-code exceptions: the worker consults
/// this policy before deciding whether to unwind the topology or log and
/// keep going.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorPolicy {
    /// A user callback error finalizes its arrow with error and requests a
    /// topology pause. This is the default.
    #[default]
    Fatal,
    /// A user callback error is logged as a warning and the fire is treated
    /// as `ComeBackLater`, i.e. the pipeline continues.
    Tolerate,
}

impl fmt::Display for ErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorPolicy::Fatal => write!(f, "fatal"),
            ErrorPolicy::Tolerate => write!(f, "tolerate"),
        }
    }
}
