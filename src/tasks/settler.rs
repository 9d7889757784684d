//! Settlement handle passed to task executors.
//!
//! A [`Settler`] is the producer side of a task: the executor (or anything
//! it hands the settler to) calls [`Settler::resolve`] or [`Settler::reject`]
//! once the work finishes. All calls after the first settlement, including a
//! settlement racing a cancellation, are silent no-ops.

use std::sync::Arc;

use super::state::{Outcome, TaskState};
use super::task::Inner;
use crate::error::TaskError;

/// Producer handle that settles a task.
///
/// Cloneable so it can travel into timer callbacks, I/O completions or other
/// tasks' continuations; every clone settles the same task.
///
/// # Example
/// ```
/// use taskweave::{Task, TaskState};
///
/// #[tokio::main(flavor = "current_thread")]
/// async fn main() {
///     let task = Task::new(|settler| {
///         let late = settler.clone();
///         settler.resolve("first");
///         late.resolve("second"); // no-op: already settled
///         Ok(())
///     });
///     assert_eq!(task.state(), TaskState::Fulfilled);
///     assert_eq!(task.await, Ok("first"));
/// }
/// ```
pub struct Settler<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Settler<T> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<T: Clone + Send + 'static> Settler<T> {
    pub(crate) fn new(inner: Arc<Inner<T>>) -> Self {
        Self { inner }
    }

    /// Fulfills the task with `value`; no-op when already terminal.
    pub fn resolve(&self, value: T) {
        self.inner.settle(Outcome::Fulfilled(value));
    }

    /// Rejects the task with `error`; no-op when already terminal.
    pub fn reject(&self, error: TaskError) {
        self.inner.settle(Outcome::Rejected(error));
    }

    /// True while the task has not settled yet.
    pub fn is_pending(&self) -> bool {
        self.inner.state() == TaskState::Pending
    }
}
