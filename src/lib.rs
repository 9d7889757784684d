//! # taskweave
//!
//! **Taskweave** provides cancelable task trees and removable call advice
//! for async Rust.
//!
//! It offers two independent primitives: a settle-once [`Task`] whose
//! cancellation walks down through derived tasks, and a [`Dispatcher`] that
//! wraps plain call sites with before/around/after advice that can be
//! removed at any time. The crate is designed as a building block for
//! lifecycle-heavy libraries and extensible call pipelines.
//!
//! ## Architecture
//! ### Task trees
//! ```text
//!      ┌─────────────────────────────┐
//!      │  Task<T> (root)             │
//!      │  - Settler (producer side)  │
//!      │  - canceler (one-shot)      │
//!      │  - children (derived tasks) │
//!      └──────┬──────────┬───────────┘
//!             ▼          ▼
//!      ┌───────────┐  ┌───────────┐
//!      │  .then()  │  │ .finally()│      cancel() walks DOWN:
//!      │  child    │  │  child    │      canceler, then this task's
//!      └─────┬─────┘  └───────────┘      cleanup, then each child,
//!            ▼                           depth-first. Never UP.
//!      ┌───────────┐
//!      │  .catch() │
//!      │ grandchild│
//!      └───────────┘
//! ```
//!
//! ### Settlement
//! ```text
//! Pending ──► Fulfilled(T)        settlement is monotonic: the first
//!         ──► Rejected(TaskError) transition wins, later resolve/
//!         ──► Canceled            reject/cancel calls are no-ops.
//!
//! Continuations (then/catch/finally) are queued onto the runtime that
//! created the task; they never run inside resolve()/reject()/cancel().
//! Cancellation itself is synchronous: cancelers and cleanups have run
//! by the time cancel() returns.
//! ```
//!
//! ### Advice dispatch
//! ```text
//! call(args)
//!   ├─► before chain   (mutates args;  method-form: newest first)
//!   ├─► around layers  (newest outermost, each may skip proceed)
//!   │      └─► bound join point
//!   ├─► after chain    (threads result; oldest first)
//!   └─► on chain       (observes args)
//!
//! Every registration returns an AdviceHandle; destroy() detaches that
//! advice and nothing else, safely even mid-walk.
//! ```
//!
//! ## Features
//! | Area             | Description                                                      | Key types                                  |
//! |------------------|------------------------------------------------------------------|--------------------------------------------|
//! | **Tasks**        | Settle-once results with downward cancellation and cleanup.      | [`Task`], [`Settler`], [`TaskState`]       |
//! | **Combinators**  | Join and race collections of tasks.                              | [`Task::all`], [`Task::all_map`], [`Task::race`] |
//! | **Tokio bridge** | Back a task with a spawned future; derive timeouts.              | [`Task::spawn`], [`Task::timeout`]         |
//! | **Advice**       | Removable before/around/after/on advice over plain functions.    | [`Dispatcher`], [`AdviceHandle`]           |
//! | **Registries**   | Named join points with method-form ordering.                     | [`AdviceRegistry`]                         |
//! | **Errors**       | Typed task failure, timeout, panic and cancellation errors.      | [`TaskError`]                              |
//!
//! ## Example
//! ```rust
//! use taskweave::{Dispatcher, Task, TaskError};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), TaskError> {
//!     // A task backed by a spawned future, with a derived continuation.
//!     let fetched = Task::spawn(|_token| async { Ok::<_, TaskError>(20) });
//!     let doubled = fetched.then(|n| Ok(n * 2));
//!     assert_eq!(doubled.await?, 40);
//!
//!     // A call site wrapped with removable advice.
//!     let render = Dispatcher::for_method(|name: String| format!("hello, {name}"));
//!     let shout = render.after(|result, _args| result.to_uppercase());
//!     assert_eq!(render.call("weaver".into()), "HELLO, WEAVER");
//!
//!     shout.destroy();
//!     assert_eq!(render.call("weaver".into()), "hello, weaver");
//!     Ok(())
//! }
//! ```
mod advice;
mod error;
mod tasks;

// ---- Public re-exports ----

pub use advice::{AdviceHandle, AdviceRegistry, Dispatcher, Proceed};
pub use error::TaskError;
pub use tasks::{Settler, Task, TaskState};
