//! `Latch`: exclusive latch owned by an execution context.
//!
//! The latch word holds the owner's context id (zero when free) plus a
//! parked bit. Acquisition is a compare-and-swap from free to the caller's
//! id. Under contention the caller spins on a short budget and then parks
//! on the latch address; release wakes one parked waiter.

use core::fmt;
use core::sync::atomic::{AtomicUsize, Ordering};

use parking_lot_core::{DEFAULT_PARK_TOKEN, DEFAULT_UNPARK_TOKEN, UnparkResult};

use crate::error::LatchError;
use crate::util::{WaitBudget, context_id};

/// Set while at least one thread may be parked on the latch.
const PARKED: usize = 1 << (usize::BITS - 1);
const OWNER: usize = !PARKED;

/// Exclusive latch.
///
/// Only the owning context may release it; a release by anyone else
/// panics. Re-acquiring a held `Latch` from its owner panics as well
/// (use [`RecursiveLatch`](super::RecursiveLatch) for reentrancy). No FIFO
/// fairness is provided.
pub struct Latch {
    word: AtomicUsize,
}

impl Latch {
    /// Create a free latch.
    #[inline]
    pub const fn new() -> Self {
        Self {
            word: AtomicUsize::new(0),
        }
    }

    /// Block until the calling context owns the latch.
    #[inline]
    pub fn lock(&self) {
        if !self.try_lock() {
            self.lock_contended(context_id());
        }
    }

    /// Attempt to take the latch without waiting.
    #[inline]
    pub fn try_lock(&self) -> bool {
        let state = self.word.load(Ordering::Relaxed);
        state & OWNER == 0
            && self
                .word
                .compare_exchange(
                    state,
                    context_id() | (state & PARKED),
                    Ordering::Acquire,
                    Ordering::Relaxed,
                )
                .is_ok()
    }

    /// Release the latch.
    ///
    /// # Panics
    /// If the calling context does not own the latch.
    #[inline]
    pub fn unlock(&self) {
        if let Err(err) = self.try_unlock() {
            panic!("{err}");
        }
    }

    /// Release the latch, reporting misuse instead of panicking.
    pub fn try_unlock(&self) -> Result<(), LatchError> {
        let me = context_id();
        let owner = self.word.load(Ordering::Relaxed) & OWNER;
        if owner != me {
            return Err(LatchError::NotOwner {
                latch: "Latch",
                owner,
                caller: me,
            });
        }
        if self.word.swap(0, Ordering::Release) & PARKED != 0 {
            self.unpark_one();
        }
        Ok(())
    }

    /// Unconditionally free the latch. Teardown only.
    pub fn reset(&self) {
        if self.word.swap(0, Ordering::Release) & PARKED != 0 {
            // SAFETY: the key is this latch's address, used only for parking here.
            unsafe {
                parking_lot_core::unpark_all(self.key(), DEFAULT_UNPARK_TOKEN);
            }
        }
    }

    /// Is the latch owned by anyone?
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.word.load(Ordering::Relaxed) & OWNER != 0
    }

    /// Is the latch owned by the calling context?
    #[inline]
    pub fn is_held(&self) -> bool {
        self.owner() == context_id()
    }

    /// Current owner's context id, zero when free.
    #[inline]
    pub(crate) fn owner(&self) -> usize {
        self.word.load(Ordering::Relaxed) & OWNER
    }

    #[inline]
    fn key(&self) -> usize {
        self as *const Self as usize
    }

    #[cold]
    fn lock_contended(&self, me: usize) {
        let mut budget = WaitBudget::hot();
        let mut state = self.word.load(Ordering::Relaxed);
        loop {
            if state & OWNER == 0 {
                match self.word.compare_exchange_weak(
                    state,
                    me | (state & PARKED),
                    Ordering::Acquire,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => return,
                    Err(now) => {
                        state = now;
                        continue;
                    }
                }
            }
            assert!(
                state & OWNER != me,
                "Latch::lock: already held by this context (non-reentrant)"
            );

            if state & PARKED == 0 {
                if budget.step() {
                    state = self.word.load(Ordering::Relaxed);
                    continue;
                }
                if let Err(now) = self.word.compare_exchange_weak(
                    state,
                    state | PARKED,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    state = now;
                    continue;
                }
            }

            let validate = || {
                let now = self.word.load(Ordering::Relaxed);
                now & PARKED != 0 && now & OWNER != 0
            };
            // SAFETY: the key is this latch's address; the callbacks neither
            // panic nor call back into parking_lot_core.
            unsafe {
                parking_lot_core::park(
                    self.key(),
                    validate,
                    || {},
                    |_, _| {},
                    DEFAULT_PARK_TOKEN,
                    None,
                );
            }
            budget.reset();
            state = self.word.load(Ordering::Relaxed);
        }
    }

    #[cold]
    fn unpark_one(&self) {
        let callback = |result: UnparkResult| {
            if result.have_more_threads {
                self.word.fetch_or(PARKED, Ordering::Relaxed);
            }
            DEFAULT_UNPARK_TOKEN
        };
        // SAFETY: the key is this latch's address; the callback only touches
        // the latch word.
        unsafe {
            parking_lot_core::unpark_one(self.key(), callback);
        }
    }
}

impl Default for Latch {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Latch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Latch").field("owner", &self.owner()).finish()
    }
}

// SAFETY: the latch grants exclusive ownership to one context at a time and
// `unlock` is only reachable from the owning thread (GuardNoSend).
unsafe impl lock_api::RawMutex for Latch {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Latch = Latch::new();

    type GuardMarker = lock_api::GuardNoSend;

    #[inline]
    fn lock(&self) {
        Latch::lock(self);
    }

    #[inline]
    fn try_lock(&self) -> bool {
        Latch::try_lock(self)
    }

    #[inline]
    unsafe fn unlock(&self) {
        Latch::unlock(self);
    }

    #[inline]
    fn is_locked(&self) -> bool {
        Latch::is_locked(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn try_lock_excludes_other_contexts() {
        let latch = Arc::new(Latch::new());
        assert!(latch.try_lock());
        assert!(latch.is_held());

        let other = Arc::clone(&latch);
        let taken = thread::spawn(move || other.try_lock()).join().unwrap();
        assert!(!taken);

        latch.unlock();
        assert!(!latch.is_locked());
    }

    #[test]
    fn unlock_by_non_owner_is_reported() {
        let latch = Arc::new(Latch::new());
        latch.lock();
        let other = Arc::clone(&latch);
        let err = thread::spawn(move || other.try_unlock())
            .join()
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, LatchError::NotOwner { latch: "Latch", .. }));
        latch.unlock();
    }

    #[test]
    #[should_panic(expected = "released by context")]
    fn unlock_of_free_latch_panics() {
        Latch::new().unlock();
    }

    #[test]
    #[should_panic(expected = "non-reentrant")]
    fn relock_by_owner_panics() {
        let latch = Latch::new();
        latch.lock();
        latch.lock();
    }

    #[test]
    fn parked_waiter_is_woken() {
        let latch = Arc::new(Latch::new());
        let acquired = Arc::new(AtomicBool::new(false));
        latch.lock();

        let waiter = {
            let latch = Arc::clone(&latch);
            let acquired = Arc::clone(&acquired);
            thread::spawn(move || {
                latch.lock();
                acquired.store(true, Ordering::SeqCst);
                latch.unlock();
            })
        };

        // Long enough for the waiter to exhaust its budget and park.
        thread::sleep(Duration::from_millis(50));
        assert!(!acquired.load(Ordering::SeqCst));
        latch.unlock();
        waiter.join().unwrap();
        assert!(acquired.load(Ordering::SeqCst));
        assert!(!latch.is_locked());
    }

    #[test]
    fn reset_frees_a_held_latch() {
        let latch = Latch::new();
        latch.lock();
        latch.reset();
        assert!(!latch.is_locked());
        assert!(latch.try_lock());
        latch.unlock();
    }
}
