//! The critical-section primitive the public operations run under.
//!
//! Every public operation takes the lock exactly once; the engine's
//! internals are plain functions on the locked state and never take it
//! again. Re-entry would spin forever on the inner lock, so with
//! `extra_assertions` enabled an occupancy flag turns it into a panic
//! that names the problem instead.

use crate::const_init::ConstInit;
#[cfg(feature = "extra_assertions")]
use core::cell::Cell;
use spin::Mutex;

pub(crate) struct Exclusive<T> {
    state: Mutex<T>,

    #[cfg(feature = "extra_assertions")]
    entered: Cell<bool>,
}

impl<T> Exclusive<T> {
    pub(crate) const fn new(state: T) -> Self {
        Exclusive {
            state: Mutex::new(state),

            #[cfg(feature = "extra_assertions")]
            entered: Cell::new(false),
        }
    }

    /// Run `f` with sole access to the state.
    #[inline]
    pub(crate) fn lock_with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut state = self.state.lock();
        self.enter();
        let result = f(&mut state);
        self.leave();
        result
    }

    fn enter(&self) {
        #[cfg(feature = "extra_assertions")]
        assert!(
            !self.entered.replace(true),
            "the critical section does not nest"
        );
    }

    fn leave(&self) {
        #[cfg(feature = "extra_assertions")]
        self.entered.set(false);
    }
}

impl<T: ConstInit> ConstInit for Exclusive<T> {
    const INIT: Self = Exclusive::new(T::INIT);
}
