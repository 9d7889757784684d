//! # Advice dispatcher: removable interception around a join point.
//!
//! A [`Dispatcher`] wraps one join point (`Fn(A) -> R`) with three ordered,
//! independently removable advice chains.
//!
//! ## Architecture
//! ```text
//! call(args)
//!   │ before chain: each advice mutates `&mut A`
//!   ▼
//! around stack (newest active layer outermost) ──► base join point
//!   │ after chain: each advice threads the result, ascending insertion id
//!   ▼
//! result
//! ```
//!
//! ## Rules
//! - **Insertion ids order everything.** Each registration takes the next id
//!   from a per-dispatcher counter. The before chain of a method-form
//!   dispatcher runs newest-first (prepend semantics); a function-form
//!   (`wrap`) dispatcher runs its before chain FIFO. The after chain always
//!   runs in ascending id order.
//! - **Re-entrancy guard.** A call captures the id counter at entry and only
//!   runs advice with a smaller id, so advice registered *during* a call
//!   never fires within that same call.
//! - **Mutation-safe walks.** The walk re-resolves the next id from the
//!   id-ordered chain after every advice invocation, so advice that detaches
//!   its neighbors (or itself) mid-walk cannot corrupt the traversal.
//! - **No error channel.** Advice panics propagate to the caller; nothing is
//!   caught or retried.

use std::collections::BTreeMap;
use std::ops::Bound::Excluded;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::handle::AdviceHandle;

/// Callable view of the rest of an around stack (or the base join point),
/// handed to an around builder.
pub type Proceed<A, R> = Arc<dyn Fn(A) -> R + Send + Sync>;

type BeforeAdvice<A> = Arc<dyn Fn(&mut A) + Send + Sync>;

enum AfterNode<A, R> {
    /// Threads the result: `advice(result, &args)` replaces the result.
    Thread(Arc<dyn Fn(R, &A) -> R + Send + Sync>),
    /// Observes the (post-before) call arguments; result untouched.
    Observe(Arc<dyn Fn(&A) + Send + Sync>),
}

impl<A, R> Clone for AfterNode<A, R> {
    fn clone(&self) -> Self {
        match self {
            AfterNode::Thread(advice) => AfterNode::Thread(Arc::clone(advice)),
            AfterNode::Observe(advice) => AfterNode::Observe(Arc::clone(advice)),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum BeforeOrder {
    /// Method form: most recently registered before-advice runs first.
    NewestFirst,
    /// Function form: before-advice runs in registration order.
    OldestFirst,
}

struct AroundLayer<A, R> {
    id: u64,
    wrapper: Proceed<A, R>,
}

struct DispatchState<A, R> {
    label: Arc<str>,
    next_id: u64,
    order: BeforeOrder,
    before: BTreeMap<u64, BeforeAdvice<A>>,
    after: BTreeMap<u64, AfterNode<A, R>>,
    /// Ascending by id; a destroyed layer is removed and calls fall through
    /// to the next one below (or the base join point).
    around: Vec<AroundLayer<A, R>>,
    base: Option<Proceed<A, R>>,
}

/// Topmost around wrapper below `bound`, falling back to the base join point.
fn entry_below<A, R>(state: &DispatchState<A, R>, bound: u64) -> Option<Proceed<A, R>> {
    state
        .around
        .iter()
        .rev()
        .find(|layer| layer.id < bound)
        .map(|layer| Arc::clone(&layer.wrapper))
        .or_else(|| state.base.clone())
}

/// # Join-point dispatcher.
///
/// Cheap to clone; all clones share the same advice chains. See the module
/// docs for ordering and re-entrancy rules.
///
/// # Example
/// ```
/// use taskweave::Dispatcher;
///
/// let greet = Dispatcher::for_method(|name: String| format!("hello, {name}"));
/// let _shout = greet.after(|result, _args| result.to_uppercase());
/// let _trim = greet.before(|name| *name = name.trim().to_string());
///
/// assert_eq!(greet.call("  world ".to_string()), "HELLO, WORLD");
/// ```
pub struct Dispatcher<A, R> {
    state: Arc<Mutex<DispatchState<A, R>>>,
}

impl<A, R> Clone for Dispatcher<A, R> {
    fn clone(&self) -> Self {
        Self { state: Arc::clone(&self.state) }
    }
}

impl<A: Clone + 'static, R: 'static> Dispatcher<A, R> {
    fn with_order(
        label: Arc<str>,
        order: BeforeOrder,
        base: Option<Proceed<A, R>>,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(DispatchState {
                label,
                next_id: 1,
                order,
                before: BTreeMap::new(),
                after: BTreeMap::new(),
                around: Vec::new(),
                base,
            })),
        }
    }

    /// Method-form dispatcher: before-advice runs newest-first.
    pub fn for_method(join_point: impl Fn(A) -> R + Send + Sync + 'static) -> Self {
        Self::with_order(
            Arc::from("join point"),
            BeforeOrder::NewestFirst,
            Some(Arc::new(join_point)),
        )
    }

    /// Function-form dispatcher: before-advice runs in registration order.
    pub fn wrap(join_point: impl Fn(A) -> R + Send + Sync + 'static) -> Self {
        Self::with_order(
            Arc::from("join point"),
            BeforeOrder::OldestFirst,
            Some(Arc::new(join_point)),
        )
    }

    /// Dispatcher with no join point yet; created lazily by the registry
    /// when a method is advised before being bound.
    pub(crate) fn unbound(label: Arc<str>) -> Self {
        Self::with_order(label, BeforeOrder::NewestFirst, None)
    }

    /// Installs (or replaces) the base join point.
    pub(crate) fn bind(&self, join_point: impl Fn(A) -> R + Send + Sync + 'static) {
        self.lock().base = Some(Arc::new(join_point));
    }

    fn lock(&self) -> MutexGuard<'_, DispatchState<A, R>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_id(&self) -> u64 {
        let mut state = self.lock();
        let id = state.next_id;
        state.next_id += 1;
        id
    }

    fn detach_handle(
        &self,
        detach: impl FnOnce(&mut DispatchState<A, R>) + Send + 'static,
    ) -> AdviceHandle {
        let weak = Arc::downgrade(&self.state);
        AdviceHandle::new(Box::new(move || {
            if let Some(state) = weak.upgrade() {
                let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
                detach(&mut state);
            }
        }))
    }

    /// Registers before-advice; it receives the argument list by `&mut` and
    /// may replace it in place.
    pub fn before(&self, advice: impl Fn(&mut A) + Send + Sync + 'static) -> AdviceHandle {
        let id = self.next_id();
        self.lock().before.insert(id, Arc::new(advice));
        self.detach_handle(move |state| {
            state.before.remove(&id);
        })
    }

    /// Registers after-advice; it receives `(result, &args)` and returns the
    /// (possibly replaced) result seen by the next after-advice or the
    /// caller.
    pub fn after(&self, advice: impl Fn(R, &A) -> R + Send + Sync + 'static) -> AdviceHandle {
        let id = self.next_id();
        self.lock().after.insert(id, AfterNode::Thread(Arc::new(advice)));
        self.detach_handle(move |state| {
            state.after.remove(&id);
        })
    }

    /// Registers observation advice on the after chain; it receives the
    /// final (post-before) call arguments and cannot touch the result.
    pub fn on(&self, advice: impl Fn(&A) + Send + Sync + 'static) -> AdviceHandle {
        let id = self.next_id();
        self.lock().after.insert(id, AfterNode::Observe(Arc::new(advice)));
        self.detach_handle(move |state| {
            state.after.remove(&id);
        })
    }

    /// Registers an around wrapper.
    ///
    /// `build` receives the previous wrapper (or the base join point) as a
    /// [`Proceed`] and returns the new outermost behavior; it typically calls
    /// the proceed somewhere in its body. Registering again wraps the
    /// existing stack rather than replacing it. Destroying a layer makes
    /// calls fall through to the layer below.
    ///
    /// The proceed resolves its target at call time, so a layer destroyed
    /// between calls is skipped even by wrappers built before the removal.
    pub fn around<B>(&self, build: B) -> AdviceHandle
    where
        B: FnOnce(Proceed<A, R>) -> Box<dyn Fn(A) -> R + Send + Sync>,
    {
        let id = self.next_id();
        let label = self.lock().label.clone();
        let weak = Arc::downgrade(&self.state);
        let proceed: Proceed<A, R> = Arc::new(move |args: A| {
            let entry = match weak.upgrade() {
                Some(state) => {
                    let state = state.lock().unwrap_or_else(PoisonError::into_inner);
                    entry_below(&state, id)
                }
                None => panic!("taskweave: proceed outlived its dispatcher"),
            };
            match entry {
                Some(entry) => entry(args),
                None => panic!("taskweave: no join point bound for '{label}'"),
            }
        });

        let wrapper: Proceed<A, R> = Arc::from(build(proceed));
        self.lock().around.push(AroundLayer { id, wrapper });
        self.detach_handle(move |state| {
            state.around.retain(|layer| layer.id != id);
        })
    }

    /// Invokes the join point through all currently registered advice.
    ///
    /// # Panics
    /// Panics when no join point is bound (registry form advised but never
    /// bound) and no around layer intercepts the call — the moral equivalent
    /// of invoking a missing method.
    pub fn call(&self, mut args: A) -> R {
        let (guard, order) = {
            let state = self.lock();
            (state.next_id, state.order)
        };

        // Before chain. The cursor is an id, re-resolved against the chain
        // after every advice so detach/insert during the walk stays safe.
        let mut cursor = match order {
            BeforeOrder::NewestFirst => guard,
            BeforeOrder::OldestFirst => 0,
        };
        loop {
            let hit = {
                let state = self.lock();
                match order {
                    BeforeOrder::NewestFirst => state
                        .before
                        .range(..cursor)
                        .next_back()
                        .map(|(id, advice)| (*id, Arc::clone(advice))),
                    BeforeOrder::OldestFirst => state
                        .before
                        .range((Excluded(cursor), Excluded(guard)))
                        .next()
                        .map(|(id, advice)| (*id, Arc::clone(advice))),
                }
            };
            match hit {
                Some((id, advice)) => {
                    advice(&mut args);
                    cursor = id;
                }
                None => break,
            }
        }

        // Around stack, then base.
        let after_args = args.clone();
        let (entry, label) = {
            let state = self.lock();
            (entry_below(&state, guard), state.label.clone())
        };
        let mut result = match entry {
            Some(entry) => entry(args),
            None => panic!("taskweave: no join point bound for '{label}'"),
        };

        // After chain, ascending id, only ids known at call start.
        let mut cursor = 0;
        loop {
            let hit = {
                let state = self.lock();
                state
                    .after
                    .range((Excluded(cursor), Excluded(guard)))
                    .next()
                    .map(|(id, node)| (*id, node.clone()))
            };
            match hit {
                Some((id, AfterNode::Thread(advice))) => {
                    result = advice(result, &after_args);
                    cursor = id;
                }
                Some((id, AfterNode::Observe(advice))) => {
                    advice(&after_args);
                    cursor = id;
                }
                None => break,
            }
        }
        result
    }

    /// Clonable closure view of this dispatcher.
    pub fn to_fn(&self) -> impl Fn(A) -> R + Clone + Send + Sync + 'static {
        let dispatcher = self.clone();
        move |args| dispatcher.call(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[test]
    fn test_method_form_before_runs_newest_first() {
        let dispatcher = Dispatcher::for_method(|trail: Vec<&'static str>| trail);
        let _a = dispatcher.before(|trail| trail.push("a"));
        let _b = dispatcher.before(|trail| trail.push("b"));
        assert_eq!(
            dispatcher.call(Vec::new()),
            vec!["b", "a"],
            "before-advice prepends: most recent first"
        );
    }

    #[test]
    fn test_function_form_before_runs_fifo() {
        let dispatcher = Dispatcher::wrap(|trail: Vec<&'static str>| trail);
        let _a = dispatcher.before(|trail| trail.push("a"));
        let _b = dispatcher.before(|trail| trail.push("b"));
        assert_eq!(dispatcher.call(Vec::new()), vec!["a", "b"]);
    }

    #[test]
    fn test_before_threads_argument_mutation_into_join_point() {
        let dispatcher = Dispatcher::for_method(|x: i32| x * 10);
        let _bump = dispatcher.before(|x| *x += 1);
        assert_eq!(dispatcher.call(4), 50);
    }

    #[test]
    fn test_after_threads_result_in_insertion_order() {
        let dispatcher = Dispatcher::for_method(|x: i32| x + 1);
        let _times_ten = dispatcher.after(|result, _args| result * 10);
        let _plus_three = dispatcher.after(|result, _args| result + 3);
        assert_eq!(dispatcher.call(1), 23, "(1+1)*10 then +3");
    }

    #[test]
    fn test_on_observes_final_arguments_without_touching_result() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = Dispatcher::for_method(|x: i32| x * 2);
        let _bump = dispatcher.before(|x| *x += 1);
        let _watch = dispatcher.on({
            let seen = Arc::clone(&seen);
            move |args| seen.lock().unwrap().push(*args)
        });
        assert_eq!(dispatcher.call(3), 8);
        assert_eq!(*seen.lock().unwrap(), vec![4], "observer sees post-before arguments");
    }

    #[test]
    fn test_around_composition_newest_is_outermost() {
        let dispatcher = Dispatcher::for_method(|s: String| format!("[{s}]"));
        let _first = dispatcher.around(|proceed| {
            Box::new(move |args| format!("first({})", proceed(args)))
        });
        let _second = dispatcher.around(|proceed| {
            Box::new(move |args| format!("second({})", proceed(args)))
        });
        assert_eq!(dispatcher.call("x".to_string()), "second(first([x]))");
    }

    #[test]
    fn test_around_destroy_falls_through_to_layer_below() {
        let dispatcher = Dispatcher::for_method(|s: String| format!("[{s}]"));
        let _first = dispatcher.around(|proceed| {
            Box::new(move |args| format!("first({})", proceed(args)))
        });
        let second = dispatcher.around(|proceed| {
            Box::new(move |args| format!("second({})", proceed(args)))
        });
        second.destroy();
        assert_eq!(dispatcher.call("x".to_string()), "first([x])");
    }

    #[test]
    fn test_destroying_all_advice_restores_direct_behavior() {
        let dispatcher = Dispatcher::for_method(|x: i32| x + 1);
        let before = dispatcher.before(|x| *x *= 2);
        let after = dispatcher.after(|result, _args| result * 100);
        let around = dispatcher.around(|proceed| Box::new(move |args| proceed(args) + 7));

        before.destroy();
        after.destroy();
        around.destroy();
        assert_eq!(dispatcher.call(3), 4, "behaviorally equivalent to the bare join point");
    }

    #[test]
    fn test_destroy_is_idempotent_and_leaves_siblings_intact() {
        let dispatcher = Dispatcher::for_method(|x: i32| x);
        let _keep_low = dispatcher.after(|result, _args| result + 1);
        let doomed = dispatcher.after(|result, _args| result + 10);
        let _keep_high = dispatcher.after(|result, _args| result + 100);

        doomed.destroy();
        doomed.destroy();
        assert_eq!(dispatcher.call(0), 101, "only the destroyed advice is gone");
    }

    #[test]
    fn test_advice_registered_during_call_does_not_fire_in_that_call() {
        let inner_fires = Arc::new(AtomicUsize::new(0));
        let dispatcher = Dispatcher::for_method(|x: i32| x);
        let registrar = dispatcher.clone();
        let _outer = dispatcher.on({
            let inner_fires = Arc::clone(&inner_fires);
            move |_args| {
                let inner_fires = Arc::clone(&inner_fires);
                // Leak the handle: this test is about firing, not removal.
                std::mem::forget(registrar.on(move |_args| {
                    inner_fires.fetch_add(1, Ordering::SeqCst);
                }));
            }
        });

        dispatcher.call(0);
        assert_eq!(
            inner_fires.load(Ordering::SeqCst),
            0,
            "advice added during a call must not fire within that call"
        );

        dispatcher.call(0);
        assert_eq!(
            inner_fires.load(Ordering::SeqCst),
            1,
            "the first call's registration fires on the second call"
        );
    }

    #[test]
    fn test_advice_can_detach_the_next_node_mid_walk() {
        let second_fired = Arc::new(AtomicBool::new(false));
        let dispatcher = Dispatcher::for_method(|x: i32| x);
        let second_handle: Arc<Mutex<Option<AdviceHandle>>> = Arc::new(Mutex::new(None));

        let _first = dispatcher.on({
            let second_handle = Arc::clone(&second_handle);
            move |_args| {
                if let Some(handle) = second_handle.lock().unwrap().as_ref() {
                    handle.destroy();
                }
            }
        });
        let second = dispatcher.on({
            let second_fired = Arc::clone(&second_fired);
            move |_args| second_fired.store(true, Ordering::SeqCst)
        });
        *second_handle.lock().unwrap() = Some(second);

        dispatcher.call(0);
        assert!(
            !second_fired.load(Ordering::SeqCst),
            "a node detached mid-walk must be skipped, not visited"
        );
    }

    #[test]
    fn test_advice_can_detach_itself_mid_walk() {
        let fires = Arc::new(AtomicUsize::new(0));
        let dispatcher = Dispatcher::for_method(|x: i32| x);
        let own_handle: Arc<Mutex<Option<AdviceHandle>>> = Arc::new(Mutex::new(None));
        let handle = dispatcher.on({
            let fires = Arc::clone(&fires);
            let own_handle = Arc::clone(&own_handle);
            move |_args| {
                fires.fetch_add(1, Ordering::SeqCst);
                if let Some(handle) = own_handle.lock().unwrap().as_ref() {
                    handle.destroy();
                }
            }
        });
        *own_handle.lock().unwrap() = Some(handle);

        dispatcher.call(0);
        dispatcher.call(0);
        assert_eq!(fires.load(Ordering::SeqCst), 1, "self-detached advice fires once");
    }

    #[test]
    fn test_to_fn_is_a_live_view() {
        let dispatcher = Dispatcher::for_method(|x: i32| x);
        let callable = dispatcher.to_fn();
        assert_eq!(callable(5), 5);
        let _bump = dispatcher.after(|result, _args| result + 1);
        assert_eq!(callable(5), 6, "advice registered later still applies");
    }

    #[test]
    fn test_wrap_form_after_chain_is_fifo_by_insertion() {
        let dispatcher = Dispatcher::wrap(|x: i32| x);
        let _first = dispatcher.after(|result, _args| result * 2);
        let _second = dispatcher.after(|result, _args| result + 1);
        assert_eq!(dispatcher.call(3), 7, "3*2 then +1");
    }
}
