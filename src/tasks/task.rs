//! # Cancelable task core.
//!
//! [`Task<T>`] is a shareable handle to the result of an asynchronous
//! computation that can be explicitly canceled before it settles. Derived
//! tasks created via [`Task::then`], [`Task::catch`] and [`Task::finally`]
//! form a tree rooted at the task they were derived from.
//!
//! ## Architecture
//! ```text
//!            ┌─────────┐  then/catch/finally  ┌─────────┐
//!  Settler ─►│  parent │─────────────────────►│  child  │──► ...
//!            └────┬────┘   (adopted as child) └────┬────┘
//!                 │ cancel()                       │
//!                 ▼                                ▼
//!          canceler + cleanup ─── depth-first ──► child walk
//! ```
//!
//! ## Rules
//! - **Single settlement**: the first of `resolve`/`reject`/`cancel` wins;
//!   everything after it is a silent no-op.
//! - **Cancellation flows down, never up**: `parent.cancel()` cancels every
//!   current child transitively; `child.cancel()` leaves the parent alone.
//! - **Continuations are never synchronous**: a `then`/`catch`/`finally`
//!   handler is scheduled on the Tokio runtime even when the task is already
//!   settled at registration time, so it never runs inside the caller's own
//!   call stack.
//! - **Cancel is synchronous**: the state flip, the canceler and the cleanup
//!   callbacks of the whole subtree all run before `cancel()` returns.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};

use tokio::runtime::Handle;

use super::settler::Settler;
use super::state::{Outcome, TaskState};
use crate::error::TaskError;

/// Callback invoked with the settled outcome of a task.
pub(crate) type Continuation<T> = Box<dyn FnOnce(Outcome<T>) + Send>;

/// Zero-argument callback (canceler or `finally` cleanup).
pub(crate) type Cleanup = Box<dyn FnOnce() + Send>;

/// Object-safe view of a task used for parent → child cancellation.
///
/// Children of differing value types hang off the same parent, so the parent
/// stores them type-erased.
pub(crate) trait Cancelable: Send + Sync {
    /// Cancels this node and, depth-first, all of its current children.
    fn cancel_walk(&self);
}

struct Slot<T> {
    outcome: Option<Outcome<T>>,
    canceler: Option<Cleanup>,
    cleanup: Option<Cleanup>,
    children: Vec<Arc<dyn Cancelable>>,
    continuations: Vec<Continuation<T>>,
    wakers: Vec<Waker>,
}

/// Shared state behind every [`Task`] handle and [`Settler`].
pub(crate) struct Inner<T> {
    slot: Mutex<Slot<T>>,
    rt: Handle,
}

impl<T: Clone + Send + 'static> Inner<T> {
    pub(crate) fn new(rt: Handle, outcome: Option<Outcome<T>>) -> Arc<Self> {
        Arc::new(Self {
            slot: Mutex::new(Slot {
                outcome,
                canceler: None,
                cleanup: None,
                children: Vec::new(),
                continuations: Vec::new(),
                wakers: Vec::new(),
            }),
            rt,
        })
    }

    fn slot(&self) -> MutexGuard<'_, Slot<T>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn rt(&self) -> &Handle {
        &self.rt
    }

    pub(crate) fn state(&self) -> TaskState {
        match &self.slot().outcome {
            Some(outcome) => outcome.state(),
            None => TaskState::Pending,
        }
    }

    /// Installs the canceler; only meaningful while pending.
    pub(crate) fn set_canceler(&self, canceler: Cleanup) {
        let mut slot = self.slot();
        if slot.outcome.is_none() {
            slot.canceler = Some(canceler);
        }
    }

    /// Installs the `finally` cleanup callback; only meaningful while pending.
    pub(crate) fn set_cleanup(&self, cleanup: Cleanup) {
        let mut slot = self.slot();
        if slot.outcome.is_none() {
            slot.cleanup = Some(cleanup);
        }
    }

    /// Takes the cleanup callback, leaving `None` behind.
    ///
    /// The single `Option` is what makes the exactly-once guarantee hold
    /// across the normal and the cancellation paths.
    pub(crate) fn take_cleanup(&self) -> Option<Cleanup> {
        self.slot().cleanup.take()
    }

    /// Settles the task; a no-op when already terminal.
    ///
    /// Pending continuations are dispatched onto the runtime, awaiting
    /// callers are woken, and the child list is dropped (a settled task no
    /// longer propagates cancellation).
    pub(crate) fn settle(&self, outcome: Outcome<T>) {
        let (continuations, wakers) = {
            let mut slot = self.slot();
            if slot.outcome.is_some() {
                return;
            }
            slot.outcome = Some(outcome.clone());
            slot.canceler = None;
            slot.children.clear();
            (
                std::mem::take(&mut slot.continuations),
                std::mem::take(&mut slot.wakers),
            )
        };
        for continuation in continuations {
            let out = outcome.clone();
            self.rt.spawn(async move { continuation(out) });
        }
        for waker in wakers {
            waker.wake();
        }
    }

    /// Registers a continuation for the settled outcome.
    ///
    /// When the task is already terminal the continuation is dispatched onto
    /// the runtime immediately; it still never runs inside the caller's own
    /// call stack.
    pub(crate) fn when(&self, continuation: Continuation<T>) {
        let mut slot = self.slot();
        if let Some(outcome) = slot.outcome.clone() {
            drop(slot);
            self.rt.spawn(async move { continuation(outcome) });
        } else {
            slot.continuations.push(continuation);
        }
    }

    /// Adopts a derived task for cancellation propagation.
    ///
    /// No-op when this task is already terminal: a settled parent can never
    /// be canceled, so the link would be dead weight.
    pub(crate) fn adopt(&self, child: Arc<dyn Cancelable>) {
        let mut slot = self.slot();
        if slot.outcome.is_none() {
            slot.children.push(child);
        }
    }
}

impl<T: Clone + Send + 'static> Cancelable for Inner<T> {
    fn cancel_walk(&self) {
        let (canceler, cleanup, children, continuations, wakers) = {
            let mut slot = self.slot();
            if slot.outcome.is_some() {
                return;
            }
            slot.outcome = Some(Outcome::Canceled);
            (
                slot.canceler.take(),
                slot.cleanup.take(),
                std::mem::take(&mut slot.children),
                std::mem::take(&mut slot.continuations),
                std::mem::take(&mut slot.wakers),
            )
        };

        // Own cleanup runs before any child's, so nested `finally` chains
        // observe parent-before-child ordering.
        if let Some(canceler) = canceler {
            canceler();
        }
        if let Some(cleanup) = cleanup {
            cleanup();
        }
        for child in children {
            child.cancel_walk();
        }

        // Continuations still learn about the settlement (aggregates like
        // `all`/`race` depend on it), but asynchronously and after the whole
        // subtree is already in the Canceled state.
        for continuation in continuations {
            self.rt.spawn(async move { continuation(Outcome::Canceled) });
        }
        for waker in wakers {
            waker.wake();
        }
    }
}

/// # Cancelable task handle.
///
/// Cheap to clone (all clones observe the same settlement) and awaitable:
/// `Task<T>` implements [`Future`] with output `Result<T, TaskError>`, where
/// cancellation surfaces as [`TaskError::Canceled`].
///
/// # Example
/// ```
/// use taskweave::{Task, TaskState};
///
/// #[tokio::main(flavor = "current_thread")]
/// async fn main() {
///     let task = Task::new(|settler| {
///         settler.resolve(21);
///         Ok(())
///     });
///     let doubled = task.then(|v| Ok(v * 2));
///
///     assert_eq!(task.state(), TaskState::Fulfilled);
///     assert_eq!(doubled.await, Ok(42));
/// }
/// ```
pub struct Task<T> {
    pub(crate) inner: Arc<Inner<T>>,
}

impl<T> Clone for Task<T> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<T: Clone + Send + 'static> Task<T> {
    /// Creates a task and runs `executor` synchronously with its [`Settler`].
    ///
    /// Returning `Err` from the executor rejects the task (unless the
    /// executor already settled it). No other side effect happens at
    /// construction.
    ///
    /// # Panics
    /// Panics when called outside a Tokio runtime context: continuations are
    /// scheduled on the runtime captured here.
    pub fn new<E>(executor: E) -> Self
    where
        E: FnOnce(Settler<T>) -> Result<(), TaskError>,
    {
        Self::build(executor, None)
    }

    /// Like [`Task::new`], with a canceler invoked if and when [`Task::cancel`]
    /// runs while the task is still pending.
    ///
    /// # Panics
    /// Panics when called outside a Tokio runtime context.
    pub fn with_canceler<E, C>(executor: E, canceler: C) -> Self
    where
        E: FnOnce(Settler<T>) -> Result<(), TaskError>,
        C: FnOnce() + Send + 'static,
    {
        Self::build(executor, Some(Box::new(canceler)))
    }

    fn build<E>(executor: E, canceler: Option<Cleanup>) -> Self
    where
        E: FnOnce(Settler<T>) -> Result<(), TaskError>,
    {
        let inner = Inner::new(Handle::current(), None);
        if let Some(canceler) = canceler {
            inner.set_canceler(canceler);
        }
        let task = Self { inner };
        let settler = Settler::new(Arc::clone(&task.inner));
        if let Err(err) = executor(settler) {
            task.inner.settle(Outcome::Rejected(err));
        }
        task
    }

    /// Returns an already-fulfilled task.
    ///
    /// For a task-valued input use [`Task::flatten`] to chain instead of
    /// nesting.
    ///
    /// # Panics
    /// Panics when called outside a Tokio runtime context.
    pub fn resolve(value: T) -> Self {
        Self {
            inner: Inner::new(Handle::current(), Some(Outcome::Fulfilled(value))),
        }
    }

    /// Returns an already-rejected task.
    ///
    /// # Panics
    /// Panics when called outside a Tokio runtime context.
    pub fn reject(error: TaskError) -> Self {
        Self {
            inner: Inner::new(Handle::current(), Some(Outcome::Rejected(error))),
        }
    }

    /// Current settlement state.
    pub fn state(&self) -> TaskState {
        self.inner.state()
    }

    /// Cancels this task and, depth-first, all tasks derived from it.
    ///
    /// Synchronous: when this returns, the whole subtree is in
    /// [`TaskState::Canceled`], the canceler has run, and every pending
    /// `finally` cleanup in the subtree has run (parent before child).
    /// No-op when the task is already terminal.
    pub fn cancel(&self) {
        self.inner.cancel_walk();
    }

    /// Derives a new task by applying `handler` to the fulfillment value.
    ///
    /// Rejection and cancellation pass through unchanged; a handler `Err`
    /// rejects the derived task. The derived task is a child of this one for
    /// cancellation purposes.
    #[must_use = "the derived task carries the handler's result"]
    pub fn then<U, F>(&self, handler: F) -> Task<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Result<U, TaskError> + Send + 'static,
    {
        let child = Inner::<U>::new(self.inner.rt.clone(), None);
        let derived = Task { inner: Arc::clone(&child) };
        self.inner.adopt(child.clone());
        self.inner.when(Box::new(move |outcome| match outcome {
            Outcome::Fulfilled(value) => match handler(value) {
                Ok(mapped) => child.settle(Outcome::Fulfilled(mapped)),
                Err(err) => child.settle(Outcome::Rejected(err)),
            },
            Outcome::Rejected(err) => child.settle(Outcome::Rejected(err)),
            Outcome::Canceled => child.cancel_walk(),
        }));
        derived
    }

    /// Derives a new task by applying `handler` to the rejection reason.
    ///
    /// Fulfillment and cancellation pass through unchanged; the handler can
    /// recover (`Ok`) or re-reject (`Err`).
    #[must_use = "the derived task carries the handler's result"]
    pub fn catch<F>(&self, handler: F) -> Task<T>
    where
        F: FnOnce(TaskError) -> Result<T, TaskError> + Send + 'static,
    {
        let child = Inner::<T>::new(self.inner.rt.clone(), None);
        let derived = Task { inner: Arc::clone(&child) };
        self.inner.adopt(child.clone());
        self.inner.when(Box::new(move |outcome| match outcome {
            Outcome::Fulfilled(value) => child.settle(Outcome::Fulfilled(value)),
            Outcome::Rejected(err) => match handler(err) {
                Ok(recovered) => child.settle(Outcome::Fulfilled(recovered)),
                Err(err) => child.settle(Outcome::Rejected(err)),
            },
            Outcome::Canceled => child.cancel_walk(),
        }));
        derived
    }

    /// Derives a passthrough task that runs `cleanup` exactly once on every
    /// settlement path (fulfill, reject, cancel).
    ///
    /// On fulfillment/rejection the cleanup runs before the derived task
    /// settles observably; on cancellation it runs synchronously inside the
    /// cancellation walk.
    #[must_use = "dropping the derived task detaches downstream consumers"]
    pub fn finally<F>(&self, cleanup: F) -> Task<T>
    where
        F: FnOnce() + Send + 'static,
    {
        let child = Inner::<T>::new(self.inner.rt.clone(), None);
        child.set_cleanup(Box::new(cleanup));
        let derived = Task { inner: Arc::clone(&child) };
        self.inner.adopt(child.clone());
        self.inner.when(Box::new(move |outcome| match outcome {
            // Cancellation runs the cleanup inside the walk; if the walk got
            // here first the cleanup slot is already empty.
            Outcome::Canceled => child.cancel_walk(),
            settled => {
                if let Some(cleanup) = child.take_cleanup() {
                    cleanup();
                }
                child.settle(settled);
            }
        }));
        derived
    }
}

impl<T: Clone + Send + 'static> Task<Task<T>> {
    /// Flattens a task-valued task by chaining instead of nesting.
    ///
    /// The result settles with the inner task's settlement; canceling the
    /// outer task propagates to the result, and once the inner task is known
    /// it adopts the result as its child too.
    #[must_use]
    pub fn flatten(&self) -> Task<T> {
        let child = Inner::<T>::new(self.inner.rt.clone(), None);
        let derived = Task { inner: Arc::clone(&child) };
        self.inner.adopt(child.clone());
        self.inner.when(Box::new(move |outcome| match outcome {
            Outcome::Fulfilled(inner_task) => {
                inner_task.inner.adopt(child.clone());
                let sink = child;
                inner_task.inner.when(Box::new(move |settled| match settled {
                    Outcome::Canceled => sink.cancel_walk(),
                    other => sink.settle(other),
                }));
            }
            Outcome::Rejected(err) => child.settle(Outcome::Rejected(err)),
            Outcome::Canceled => child.cancel_walk(),
        }));
        derived
    }
}

impl<T: Clone + Send + 'static> Future for Task<T> {
    type Output = Result<T, TaskError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut slot = self.inner.slot();
        match &slot.outcome {
            Some(Outcome::Fulfilled(value)) => Poll::Ready(Ok(value.clone())),
            Some(Outcome::Rejected(err)) => Poll::Ready(Err(err.clone())),
            Some(Outcome::Canceled) => Poll::Ready(Err(TaskError::Canceled)),
            None => {
                if !slot.wakers.iter().any(|w| w.will_wake(cx.waker())) {
                    slot.wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn pending_task<T: Clone + Send + 'static>() -> (Task<T>, Settler<T>) {
        let stash = Arc::new(Mutex::new(None));
        let task = Task::new({
            let stash = Arc::clone(&stash);
            move |settler| {
                *stash.lock().unwrap() = Some(settler);
                Ok(())
            }
        });
        let settler = stash.lock().unwrap().take().unwrap();
        (task, settler)
    }

    #[tokio::test]
    async fn test_single_settlement_is_monotonic() {
        let (task, settler) = pending_task::<i32>();
        settler.resolve(1);
        assert_eq!(task.state(), TaskState::Fulfilled);

        settler.resolve(2);
        settler.reject(TaskError::failed("late"));
        task.cancel();
        assert_eq!(task.state(), TaskState::Fulfilled, "terminal state must not change");
        assert_eq!(task.await, Ok(1));
    }

    #[tokio::test]
    async fn test_then_returns_distinct_task_and_mirrors_settled_parent() {
        let parent = Task::resolve(5);
        let child = parent.then(|v| Ok(v + 1));
        assert!(
            !std::ptr::eq(
                Arc::as_ptr(&parent.inner) as *const (),
                Arc::as_ptr(&child.inner) as *const ()
            ),
            "then must return a new task"
        );
        assert_eq!(child.clone().await, Ok(6));
        assert_eq!(child.state(), TaskState::Fulfilled);
    }

    #[tokio::test]
    async fn test_then_handler_never_runs_synchronously() {
        let fired = Arc::new(AtomicBool::new(false));
        let parent = Task::resolve(1);
        let child = parent.then({
            let fired = Arc::clone(&fired);
            move |v| {
                fired.store(true, Ordering::SeqCst);
                Ok(v)
            }
        });
        assert!(
            !fired.load(Ordering::SeqCst),
            "handler must not fire inside the then() call stack"
        );
        assert_eq!(child.await, Ok(1));
        assert!(fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_executor_error_rejects_task() {
        let task: Task<i32> = Task::new(|_settler| Err(TaskError::failed("boom")));
        assert_eq!(task.state(), TaskState::Rejected);
        assert_eq!(task.await, Err(TaskError::failed("boom")));
    }

    #[tokio::test]
    async fn test_handler_error_rejects_derived_task_only() {
        let parent = Task::resolve(1);
        let child = parent.then(|_| Err::<i32, _>(TaskError::failed("handler")));
        assert_eq!(child.await, Err(TaskError::failed("handler")));
        assert_eq!(parent.state(), TaskState::Fulfilled);
    }

    #[tokio::test]
    async fn test_catch_recovers_from_rejection() {
        let task = Task::<i32>::reject(TaskError::failed("boom"));
        let recovered = task.catch(|err| {
            assert_eq!(err, TaskError::failed("boom"));
            Ok(7)
        });
        assert_eq!(recovered.await, Ok(7));
    }

    #[tokio::test]
    async fn test_catch_passes_fulfillment_through() {
        let task = Task::resolve(3);
        let passed = task.catch(|_| Ok(0));
        assert_eq!(passed.await, Ok(3));
    }

    #[tokio::test]
    async fn test_cancel_propagates_to_children_not_to_parent() {
        let (parent, _settler) = pending_task::<i32>();
        let child_a = parent.then(|v| Ok(v + 1));
        let child_b = parent.then(|v| Ok(v * 2));
        let grandchild = child_a.then(Ok);

        parent.cancel();
        assert_eq!(child_a.state(), TaskState::Canceled);
        assert_eq!(child_b.state(), TaskState::Canceled);
        assert_eq!(grandchild.state(), TaskState::Canceled);

        let (parent, _settler) = pending_task::<i32>();
        let child = parent.then(Ok);
        child.cancel();
        assert_eq!(child.state(), TaskState::Canceled);
        assert_eq!(parent.state(), TaskState::Pending, "cancellation must not flow upward");
    }

    #[tokio::test]
    async fn test_cancel_is_synchronous_and_late_resolve_is_noop() {
        let cleaned = Arc::new(AtomicBool::new(false));
        let stash = Arc::new(Mutex::new(None));
        let task = Task::with_canceler(
            {
                let stash = Arc::clone(&stash);
                move |settler: Settler<i32>| {
                    *stash.lock().unwrap() = Some(settler);
                    Ok(())
                }
            },
            {
                let cleaned = Arc::clone(&cleaned);
                move || cleaned.store(true, Ordering::SeqCst)
            },
        );
        let chained_fired = Arc::new(AtomicBool::new(false));
        let chained = task.then({
            let chained_fired = Arc::clone(&chained_fired);
            move |v| {
                chained_fired.store(true, Ordering::SeqCst);
                Ok(v)
            }
        });

        task.cancel();
        assert_eq!(task.state(), TaskState::Canceled, "state flips before cancel() returns");
        assert!(cleaned.load(Ordering::SeqCst), "canceler runs before cancel() returns");

        // The original resolve arriving later must change nothing.
        let settler = stash.lock().unwrap().take().unwrap();
        settler.resolve(42);
        assert_eq!(task.state(), TaskState::Canceled);

        tokio::task::yield_now().await;
        assert!(!chained_fired.load(Ordering::SeqCst), "continuation chain must stay dead");
        assert_eq!(chained.state(), TaskState::Canceled);
    }

    #[tokio::test]
    async fn test_cancel_after_settlement_is_noop() {
        let cleaned = Arc::new(AtomicBool::new(false));
        let task = Task::with_canceler(
            |settler: Settler<i32>| {
                settler.resolve(1);
                Ok(())
            },
            {
                let cleaned = Arc::clone(&cleaned);
                move || cleaned.store(true, Ordering::SeqCst)
            },
        );
        task.cancel();
        assert_eq!(task.state(), TaskState::Fulfilled);
        assert!(!cleaned.load(Ordering::SeqCst), "canceler must not run after settlement");
    }

    #[tokio::test]
    async fn test_finally_runs_exactly_once_on_fulfill() {
        let count = Arc::new(AtomicUsize::new(0));
        let (task, settler) = pending_task::<i32>();
        let finalized = task.finally({
            let count = Arc::clone(&count);
            move || {
                count.fetch_add(1, Ordering::SeqCst);
            }
        });
        settler.resolve(9);
        assert_eq!(finalized.clone().await, Ok(9), "finally passes the value through");
        finalized.cancel();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_finally_runs_exactly_once_on_reject() {
        let count = Arc::new(AtomicUsize::new(0));
        let (task, settler) = pending_task::<i32>();
        let finalized = task.finally({
            let count = Arc::clone(&count);
            move || {
                count.fetch_add(1, Ordering::SeqCst);
            }
        });
        settler.reject(TaskError::failed("boom"));
        assert_eq!(
            finalized.await,
            Err(TaskError::failed("boom")),
            "finally passes the reason through"
        );
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_finally_runs_exactly_once_on_cancel() {
        let count = Arc::new(AtomicUsize::new(0));
        let (task, _settler) = pending_task::<i32>();
        let finalized = task.finally({
            let count = Arc::clone(&count);
            move || {
                count.fetch_add(1, Ordering::SeqCst);
            }
        });
        task.cancel();
        assert_eq!(finalized.state(), TaskState::Canceled);
        assert_eq!(count.load(Ordering::SeqCst), 1, "cleanup runs inside the cancel walk");

        tokio::task::yield_now().await;
        assert_eq!(count.load(Ordering::SeqCst), 1, "late continuation must not re-run cleanup");
    }

    #[tokio::test]
    async fn test_cancel_cleanup_order_is_parent_before_child() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let (root, _settler) = pending_task::<i32>();
        let outer = root.finally({
            let order = Arc::clone(&order);
            move || order.lock().unwrap().push("outer")
        });
        let _inner = outer.finally({
            let order = Arc::clone(&order);
            move || order.lock().unwrap().push("inner")
        });

        root.cancel();
        assert_eq!(*order.lock().unwrap(), vec!["outer", "inner"]);
    }

    #[tokio::test]
    async fn test_flatten_chains_inner_settlement() {
        let inner = Task::resolve(11);
        let outer = Task::resolve(inner);
        assert_eq!(outer.flatten().await, Ok(11));
    }

    #[tokio::test]
    async fn test_flatten_propagates_outer_cancellation() {
        let (outer, _settler) = pending_task::<Task<i32>>();
        let flat = outer.flatten();
        outer.cancel();
        assert_eq!(flat.state(), TaskState::Canceled);
    }

    #[tokio::test]
    async fn test_clones_share_settlement() {
        let (task, settler) = pending_task::<i32>();
        let copy = task.clone();
        settler.resolve(8);
        assert_eq!(copy.state(), TaskState::Fulfilled);
        assert_eq!(copy.await, Ok(8));
        assert_eq!(task.await, Ok(8));
    }
}
