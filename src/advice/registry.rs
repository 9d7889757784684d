//! # Named-dispatcher registry.
//!
//! [`AdviceRegistry`] plays the role of an advisable object: a set of named
//! methods sharing one argument/result shape, each backed by its own
//! [`Dispatcher`]. The registry is an owned value, not a module-level
//! singleton, so independent registries coexist and are collected
//! independently; removal handles reference dispatcher state weakly.
//!
//! ## Rules
//! - **Lazy dispatchers**: advising a name creates its dispatcher on the
//!   spot, join point or not. Binding can come later.
//! - **No target validation**: advising a never-bound name is accepted;
//!   the failure surfaces as a panic when the name is actually *called*,
//!   like invoking a missing method.
//! - **Destroying all advice** on a name leaves it behaviorally identical
//!   to calling the bound join point directly.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::dispatcher::{Dispatcher, Proceed};
use super::handle::AdviceHandle;

/// Registry of named join points with method-form advice semantics.
///
/// # Example
/// ```
/// use taskweave::AdviceRegistry;
///
/// let registry: AdviceRegistry<i32, i32> = AdviceRegistry::new();
/// registry.bind("double", |x| x * 2);
///
/// let log = registry.before("double", |x| *x += 1);
/// assert_eq!(registry.call("double", 4), 10);
///
/// log.destroy();
/// assert_eq!(registry.call("double", 4), 8);
/// ```
pub struct AdviceRegistry<A, R> {
    methods: Mutex<HashMap<String, Dispatcher<A, R>>>,
}

impl<A: Clone + 'static, R: 'static> AdviceRegistry<A, R> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self { methods: Mutex::new(HashMap::new()) }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Dispatcher<A, R>>> {
        self.methods.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Installs (or replaces) the join point behind `name`, keeping any
    /// advice already registered on it.
    pub fn bind(&self, name: &str, join_point: impl Fn(A) -> R + Send + Sync + 'static) {
        self.dispatcher(name).bind(join_point);
    }

    /// Returns the dispatcher for `name`, creating it lazily.
    pub fn dispatcher(&self, name: &str) -> Dispatcher<A, R> {
        let mut methods = self.lock();
        methods
            .entry(name.to_string())
            .or_insert_with(|| Dispatcher::unbound(Arc::from(name)))
            .clone()
    }

    /// Calls `name` through its advice chains.
    ///
    /// # Panics
    /// Panics when `name` was never bound and no around layer intercepts
    /// the call.
    pub fn call(&self, name: &str, args: A) -> R {
        self.dispatcher(name).call(args)
    }

    /// Registers before-advice on `name`. See [`Dispatcher::before`].
    pub fn before(
        &self,
        name: &str,
        advice: impl Fn(&mut A) + Send + Sync + 'static,
    ) -> AdviceHandle {
        self.dispatcher(name).before(advice)
    }

    /// Registers after-advice on `name`. See [`Dispatcher::after`].
    pub fn after(
        &self,
        name: &str,
        advice: impl Fn(R, &A) -> R + Send + Sync + 'static,
    ) -> AdviceHandle {
        self.dispatcher(name).after(advice)
    }

    /// Registers observation advice on `name`. See [`Dispatcher::on`].
    pub fn on(&self, name: &str, advice: impl Fn(&A) + Send + Sync + 'static) -> AdviceHandle {
        self.dispatcher(name).on(advice)
    }

    /// Registers an around wrapper on `name`. See [`Dispatcher::around`].
    pub fn around<B>(&self, name: &str, build: B) -> AdviceHandle
    where
        B: FnOnce(Proceed<A, R>) -> Box<dyn Fn(A) -> R + Send + Sync>,
    {
        self.dispatcher(name).around(build)
    }

    /// True when a dispatcher exists for `name` (bound or not).
    pub fn contains(&self, name: &str) -> bool {
        self.lock().contains_key(name)
    }

    /// Sorted list of known names.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().keys().cloned().collect();
        names.sort_unstable();
        names
    }
}

impl<A: Clone + 'static, R: 'static> Default for AdviceRegistry<A, R> {
    fn default() -> Self {
        Self::new()
    }
}
