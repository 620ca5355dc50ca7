//! Units of work and their terminal states.

use serde::{Deserialize, Serialize};

use crate::error::TaskError;

/// Result of one execution: a value, or a normalized error. Exactly one of
/// the two — the execution core never panics its way out of an operation.
pub type Outcome<T> = Result<T, TaskError>;

/// An immutable unit of work within a batch.
///
/// `index` is the task's stable ordinal, unique within its batch; batch
/// results are reassembled in ascending index order no matter when each task
/// finishes. `payload` is opaque to the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task<P> {
    pub index: usize,
    pub payload: P,
}

impl<P> Task<P> {
    pub fn new(index: usize, payload: P) -> Self {
        Self { index, payload }
    }
}

/// Terminal state of one batch task.
///
/// A batch never aborts because a single task exhausted its retries: the
/// task instead completes `Degraded`, carrying the best available fallback
/// value plus the error that exhausted it. Callers can always distinguish a
/// verified success from a degraded one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Completion<T> {
    /// The task's executor succeeded.
    Verified(T),
    /// Retries were exhausted; `value` is the caller-supplied fallback.
    Degraded { value: T, error: TaskError },
}

impl<T> Completion<T> {
    /// The carried value, fallback or not.
    pub fn value(&self) -> &T {
        match self {
            Completion::Verified(value) | Completion::Degraded { value, .. } => value,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            Completion::Verified(value) | Completion::Degraded { value, .. } => value,
        }
    }

    /// The error annotation, present only on degraded completions.
    pub fn error(&self) -> Option<&TaskError> {
        match self {
            Completion::Verified(_) => None,
            Completion::Degraded { error, .. } => Some(error),
        }
    }

    #[must_use]
    pub fn is_verified(&self) -> bool {
        matches!(self, Completion::Verified(_))
    }

    #[must_use]
    pub fn is_degraded(&self) -> bool {
        matches!(self, Completion::Degraded { .. })
    }
}
