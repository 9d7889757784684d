//! Removal handle returned by every advice registration.

use std::sync::{Mutex, PoisonError};

/// Detaches one registered advice from its dispatcher.
///
/// The handle owns a one-shot detach closure holding only a weak reference
/// to the dispatcher, so keeping handles around does not keep a dropped
/// dispatcher alive.
///
/// # Example
/// ```
/// use taskweave::Dispatcher;
///
/// let dispatcher = Dispatcher::for_method(|x: i32| x);
/// let handle = dispatcher.after(|result, _args| result + 1);
///
/// assert_eq!(dispatcher.call(1), 2);
/// handle.destroy();
/// handle.destroy(); // idempotent
/// assert_eq!(dispatcher.call(1), 1);
/// ```
#[must_use = "dropping the handle makes the advice permanent"]
pub struct AdviceHandle {
    detach: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl AdviceHandle {
    pub(crate) fn new(detach: Box<dyn FnOnce() + Send>) -> Self {
        Self { detach: Mutex::new(Some(detach)) }
    }

    /// Detaches exactly this advice; sibling advice is untouched.
    ///
    /// Safe to call more than once and safe to call from inside advice while
    /// a dispatch is walking the chain.
    pub fn destroy(&self) {
        let detach = self
            .detach
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(detach) = detach {
            detach();
        }
    }

    /// True once [`AdviceHandle::destroy`] has run.
    pub fn is_destroyed(&self) -> bool {
        self.detach
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_destroy_runs_detach_exactly_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let handle = AdviceHandle::new(Box::new({
            let count = Arc::clone(&count);
            move || {
                count.fetch_add(1, Ordering::SeqCst);
            }
        }));
        assert!(!handle.is_destroyed());
        handle.destroy();
        handle.destroy();
        assert!(handle.is_destroyed());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
