//! # Cancelable task trees.
//!
//! The task layer: a settle-once result type with explicit cancellation that
//! propagates through derived tasks.
//!
//! - [`Task`] — shareable, awaitable handle (`task` module);
//! - [`Settler`] — producer side handed to executors (`settler`);
//! - [`TaskState`] — settlement state machine (`state`);
//! - joins and races over many tasks (`combine`);
//! - Tokio bridges: spawned bodies and timeouts (`spawn`).

mod combine;
mod settler;
mod spawn;
mod state;
mod task;

pub use settler::Settler;
pub use state::TaskState;
pub use task::Task;
