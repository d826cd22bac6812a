//! Debug-only reentrancy detection.
//!
//! Policy callbacks and scan callbacks run while a bucket walk is in
//! progress; re-entering the set from inside one would corrupt the walk.
//! Every public entry point holds a guard for its duration. In debug
//! builds a nested enter panics; in release builds the guard compiles to
//! nothing.

use core::cell::Cell;
use core::marker::PhantomData;

#[derive(Debug)]
pub(crate) struct Reentrancy {
    #[cfg(debug_assertions)]
    active: Cell<bool>,
    // Keeps the owner !Send + !Sync, matching the single-threaded contract.
    _nosend: PhantomData<*mut ()>,
}

impl Reentrancy {
    pub(crate) const fn new() -> Self {
        Self {
            #[cfg(debug_assertions)]
            active: Cell::new(false),
            _nosend: PhantomData,
        }
    }

    #[inline]
    pub(crate) fn enter(&self) -> Entered {
        #[cfg(debug_assertions)]
        {
            assert!(
                !self.active.get(),
                "re-entered the set from a policy or scan callback"
            );
            self.active.set(true);
            return Entered {
                owner: self as *const Reentrancy,
            };
        }

        #[cfg(not(debug_assertions))]
        {
            return Entered { _priv: () };
        }
    }
}

/// RAII token returned by [`Reentrancy::enter`].
///
/// Holds a raw pointer rather than `&Reentrancy` so that obtaining the
/// guard does not keep `self` borrowed for the guard's lifetime; callers
/// otherwise could not also take `&mut self` while the guard is alive. The
/// pointer stays valid because the guard never outlives the `&self`/`&mut
/// self` call that created it.
pub(crate) struct Entered {
    #[cfg(debug_assertions)]
    owner: *const Reentrancy,
    #[cfg(not(debug_assertions))]
    _priv: (),
}

impl Drop for Entered {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        unsafe {
            (*self.owner).active.set(false);
        }
    }
}
