//! # Task aggregation: `all`, `all_map`, `race`.
//!
//! Two shape-mirroring join forms plus a first-settlement race. Following the
//! shape of the input collection in the result keeps call sites free of
//! re-assembly code: a `Vec` of tasks joins into a `Vec` of values, a map of
//! tasks joins into a map of values under the same keys.
//!
//! ## Rules
//! - **Empty input settles immediately** with an empty collection of the same
//!   shape (`race` of nothing stays pending forever).
//! - **First rejection wins**: the aggregate rejects as soon as any input
//!   rejects; stragglers settle into the void.
//! - **No cancellation cascade**: canceling the aggregate does NOT cancel the
//!   inputs — they are independent tasks that other consumers may still be
//!   chained on. This is deliberate and pinned by a test.
//! - A canceled input surfaces to `all`/`all_map` as
//!   [`TaskError::Canceled`]; `race` adopts the winner's settlement as-is,
//!   including cancellation.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::runtime::Handle;

use super::state::Outcome;
use super::task::{Cancelable, Inner, Task};
use crate::error::TaskError;

struct VecJoin<T> {
    slots: Vec<Option<T>>,
    remaining: usize,
}

struct MapJoin<K, T> {
    done: BTreeMap<K, T>,
    remaining: usize,
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<T: Clone + Send + 'static> Task<T> {
    /// Joins a `Vec` of tasks into a task of the values, in input order.
    ///
    /// Rejects with the first input rejection; a canceled input rejects the
    /// aggregate with [`TaskError::Canceled`]. Canceling the aggregate leaves
    /// the inputs running.
    ///
    /// # Panics
    /// Panics when called outside a Tokio runtime context.
    ///
    /// # Example
    /// ```
    /// use taskweave::Task;
    ///
    /// #[tokio::main(flavor = "current_thread")]
    /// async fn main() {
    ///     let joined = Task::all(vec![Task::resolve(1), Task::resolve(2)]);
    ///     assert_eq!(joined.await, Ok(vec![1, 2]));
    /// }
    /// ```
    #[must_use]
    pub fn all(tasks: Vec<Task<T>>) -> Task<Vec<T>> {
        let aggregate = Inner::<Vec<T>>::new(Handle::current(), None);
        let result = Task { inner: Arc::clone(&aggregate) };
        if tasks.is_empty() {
            aggregate.settle(Outcome::Fulfilled(Vec::new()));
            return result;
        }

        let join = Arc::new(Mutex::new(VecJoin {
            slots: vec![None; tasks.len()],
            remaining: tasks.len(),
        }));
        for (index, task) in tasks.iter().enumerate() {
            let aggregate = Arc::clone(&aggregate);
            let join = Arc::clone(&join);
            task.inner.when(Box::new(move |outcome| match outcome {
                Outcome::Fulfilled(value) => {
                    let complete = {
                        let mut state = lock(&join);
                        state.slots[index] = Some(value);
                        state.remaining -= 1;
                        state.remaining == 0
                    };
                    if complete {
                        let values: Vec<T> = lock(&join).slots.drain(..).flatten().collect();
                        aggregate.settle(Outcome::Fulfilled(values));
                    }
                }
                Outcome::Rejected(err) => aggregate.settle(Outcome::Rejected(err)),
                Outcome::Canceled => {
                    aggregate.settle(Outcome::Rejected(TaskError::Canceled));
                }
            }));
        }
        result
    }

    /// Joins a map of tasks into a task of a map of values under the same
    /// keys. Semantics otherwise identical to [`Task::all`].
    ///
    /// # Panics
    /// Panics when called outside a Tokio runtime context.
    #[must_use]
    pub fn all_map<K>(tasks: BTreeMap<K, Task<T>>) -> Task<BTreeMap<K, T>>
    where
        K: Ord + Clone + Send + 'static,
    {
        let aggregate = Inner::<BTreeMap<K, T>>::new(Handle::current(), None);
        let result = Task { inner: Arc::clone(&aggregate) };
        if tasks.is_empty() {
            aggregate.settle(Outcome::Fulfilled(BTreeMap::new()));
            return result;
        }

        let join = Arc::new(Mutex::new(MapJoin {
            done: BTreeMap::new(),
            remaining: tasks.len(),
        }));
        for (key, task) in &tasks {
            let aggregate = Arc::clone(&aggregate);
            let join = Arc::clone(&join);
            let key = key.clone();
            task.inner.when(Box::new(move |outcome| match outcome {
                Outcome::Fulfilled(value) => {
                    let complete = {
                        let mut state = lock(&join);
                        state.done.insert(key, value);
                        state.remaining -= 1;
                        state.remaining == 0
                    };
                    if complete {
                        let done = std::mem::take(&mut lock(&join).done);
                        aggregate.settle(Outcome::Fulfilled(done));
                    }
                }
                Outcome::Rejected(err) => aggregate.settle(Outcome::Rejected(err)),
                Outcome::Canceled => {
                    aggregate.settle(Outcome::Rejected(TaskError::Canceled));
                }
            }));
        }
        result
    }

    /// Settles with the first input to settle, in completion order.
    ///
    /// Later settlements have no observable effect. An empty race never
    /// settles. Canceling the race leaves the inputs running.
    ///
    /// # Panics
    /// Panics when called outside a Tokio runtime context.
    #[must_use]
    pub fn race(tasks: Vec<Task<T>>) -> Task<T> {
        let aggregate = Inner::<T>::new(Handle::current(), None);
        for task in &tasks {
            let aggregate = Arc::clone(&aggregate);
            task.inner.when(Box::new(move |outcome| match outcome {
                Outcome::Canceled => aggregate.cancel_walk(),
                settled => aggregate.settle(settled),
            }));
        }
        Task { inner: aggregate }
    }
}
