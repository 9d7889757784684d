//! Settlement states and the crate-internal settled outcome.

use crate::error::TaskError;

/// Settlement state of a [`Task`](crate::Task).
///
/// Exactly one transition ever happens: `Pending` to one of the three
/// terminal states. Terminal states are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Not settled yet.
    Pending,
    /// Settled with a value.
    Fulfilled,
    /// Settled with a [`TaskError`].
    Rejected,
    /// Explicitly canceled before settling.
    Canceled,
}

impl TaskState {
    /// Stable lowercase label, suitable for logs and assertions.
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Fulfilled => "fulfilled",
            TaskState::Rejected => "rejected",
            TaskState::Canceled => "canceled",
        }
    }

    /// True for every state except [`TaskState::Pending`].
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskState::Pending)
    }
}

/// Settled payload stored in a task's slot and handed to continuations.
#[derive(Debug, Clone)]
pub(crate) enum Outcome<T> {
    Fulfilled(T),
    Rejected(TaskError),
    Canceled,
}

impl<T> Outcome<T> {
    pub(crate) fn state(&self) -> TaskState {
        match self {
            Outcome::Fulfilled(_) => TaskState::Fulfilled,
            Outcome::Rejected(_) => TaskState::Rejected,
            Outcome::Canceled => TaskState::Canceled,
        }
    }
}
