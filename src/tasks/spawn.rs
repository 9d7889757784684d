//! # Bridges between tasks and the Tokio runtime.
//!
//! [`Task::spawn`] backs a task with a spawned future. The future receives a
//! [`CancellationToken`] and is expected to check it cooperatively: canceling
//! the task cancels the token, the task flips to `Canceled` immediately, and
//! whatever the future later produces settles into the void.
//!
//! Panics inside the future are caught at the task boundary and surface as
//! [`TaskError::Panicked`] instead of tearing down the runtime worker.
//!
//! [`Task::timeout`] is the timeout recipe for task-returning APIs: race the
//! task against a timer-driven rejection and cancel it when the timer wins.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use super::state::{Outcome, TaskState};
use super::task::{Cancelable, Inner, Task};
use crate::error::TaskError;

fn panic_reason(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

impl<T: Clone + Send + 'static> Task<T> {
    /// Backs a task with a spawned future.
    ///
    /// `factory` runs synchronously and receives a fresh
    /// [`CancellationToken`]; the future it returns is spawned onto the
    /// current runtime. Canceling the task cancels the token — the body
    /// decides how quickly to honor it.
    ///
    /// # Panics
    /// Panics when called outside a Tokio runtime context.
    ///
    /// # Example
    /// ```
    /// use taskweave::{Task, TaskError};
    ///
    /// #[tokio::main(flavor = "current_thread")]
    /// async fn main() {
    ///     let task = Task::spawn(|token| async move {
    ///         if token.is_cancelled() {
    ///             return Err(TaskError::Canceled);
    ///         }
    ///         Ok::<_, TaskError>("done")
    ///     });
    ///     assert_eq!(task.await, Ok("done"));
    /// }
    /// ```
    pub fn spawn<F, Fut>(factory: F) -> Task<T>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, TaskError>> + Send + 'static,
    {
        let token = CancellationToken::new();
        let inner = Inner::<T>::new(Handle::current(), None);
        {
            let token = token.clone();
            inner.set_canceler(Box::new(move || token.cancel()));
        }

        let body = factory(token);
        let sink = inner.clone();
        inner.rt().spawn(async move {
            match AssertUnwindSafe(body).catch_unwind().await {
                Ok(Ok(value)) => sink.settle(Outcome::Fulfilled(value)),
                Ok(Err(err)) => sink.settle(Outcome::Rejected(err)),
                Err(payload) => sink.settle(Outcome::Rejected(TaskError::Panicked {
                    reason: panic_reason(payload),
                })),
            }
        });
        Task { inner }
    }

    /// Derives a task that rejects with [`TaskError::Timeout`] unless this
    /// task settles within `timeout`.
    ///
    /// When the timer wins, this task is canceled (canceler, cleanups and
    /// children included). When this task settles or is canceled first, the
    /// timer expiry is a no-op.
    #[must_use = "the derived task carries the timeout result"]
    pub fn timeout(&self, timeout: Duration) -> Task<T> {
        let child = Inner::<T>::new(self.inner.rt().clone(), None);
        let derived = Task { inner: child.clone() };
        self.inner.adopt(child.clone());
        {
            let child = child.clone();
            self.inner.when(Box::new(move |outcome| match outcome {
                Outcome::Canceled => child.cancel_walk(),
                settled => child.settle(settled),
            }));
        }

        let source = self.clone();
        child.rt().clone().spawn(async move {
            tokio::time::sleep(timeout).await;
            if child.state() == TaskState::Pending {
                child.settle(Outcome::Rejected(TaskError::Timeout { timeout }));
                source.cancel();
            }
        });
        derived
    }
}
