//! # Removable call advice.
//!
//! The advice layer: wrap plain `Fn(A) -> R` call sites with observation,
//! argument mutation, result threading and full interception, each removable
//! through a handle.
//!
//! - [`Dispatcher`] — one advisable join point and its chains (`dispatcher`);
//! - [`AdviceRegistry`] — named join points with method-form semantics
//!   (`registry`);
//! - [`AdviceHandle`] — idempotent removal handle (`handle`).
//!
//! ## Rules
//! - Advice fires in insertion order; the order's direction depends on how
//!   the dispatcher was built (see [`Dispatcher::for_method`] vs
//!   [`Dispatcher::wrap`]).
//! - Advice registered while a call is in flight never fires during that
//!   call.
//! - Destroying advice mid-walk is safe, including self-removal.

mod dispatcher;
mod handle;
mod registry;

pub use dispatcher::{Dispatcher, Proceed};
pub use handle::AdviceHandle;
pub use registry::AdviceRegistry;
