//! Shared/exclusive latch pair.
//!
//! The count word holds the number of shared holders in its low bits and a
//! reservation bit at the top. A writer first sets the reservation, which
//! turns away new shared holders, then waits for the holders it reserved
//! against to drain. Holding both sides from one thread deadlocks; this is
//! not detected.
//!
//! ```
//! use spindle::latch::{LatchGuard, SharedLatch};
//!
//! let shr = SharedLatch::new();
//! {
//!     let _read = LatchGuard::acquire(&shr);
//!     assert_eq!(shr.readers(), 1);
//! }
//! let xcl = shr.exclusive();
//! let _write = LatchGuard::acquire(&xcl);
//! assert!(xcl.is_held());
//! ```

use core::fmt;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::error::LatchError;
use crate::util::{WaitBudget, context_id};

const RESERVED: usize = 1 << (usize::BITS - 1);
const READERS: usize = !RESERVED;

/// The shared side of the pair; also owns the pair's state.
pub struct SharedLatch {
    count: AtomicUsize,
    writer: AtomicUsize,
}

impl SharedLatch {
    /// Create a free latch pair.
    #[inline]
    pub const fn new() -> Self {
        Self {
            count: AtomicUsize::new(0),
            writer: AtomicUsize::new(0),
        }
    }

    /// The exclusive side of this pair.
    #[inline]
    pub fn exclusive(&self) -> ExclusiveLatch<'_> {
        ExclusiveLatch { share: self }
    }

    /// Block until a shared hold is granted.
    pub fn lock(&self) {
        let mut budget = WaitBudget::hot();
        while !self.try_lock() {
            budget.snooze();
        }
    }

    /// Take a shared hold unless the pair is held or reserved exclusively.
    pub fn try_lock(&self) -> bool {
        let mut state = self.count.load(Ordering::Relaxed);
        loop {
            if state & RESERVED != 0 {
                return false;
            }
            match self.count.compare_exchange_weak(
                state,
                state + 1,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(now) => state = now,
            }
        }
    }

    /// Release a shared hold.
    ///
    /// # Panics
    /// If there is no shared holder.
    pub fn unlock(&self) {
        if let Err(err) = self.try_unlock() {
            panic!("{err}");
        }
    }

    /// Release a shared hold, reporting misuse instead of panicking.
    pub fn try_unlock(&self) -> Result<(), LatchError> {
        let mut state = self.count.load(Ordering::Relaxed);
        loop {
            if state & READERS == 0 {
                return Err(LatchError::NotHeld {
                    latch: "SharedLatch",
                });
            }
            match self.count.compare_exchange_weak(
                state,
                state - 1,
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Ok(()),
                Err(now) => state = now,
            }
        }
    }

    /// Upgrade the caller's shared hold to exclusive.
    ///
    /// Succeeds only if the caller is the sole shared holder and no writer
    /// has reserved the pair. On failure the shared hold is kept.
    pub fn try_upgrade(&self) -> bool {
        if self
            .count
            .compare_exchange(1, RESERVED, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            self.writer.store(context_id(), Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Unconditionally free both sides. Teardown only.
    pub fn reset(&self) {
        self.writer.store(0, Ordering::Relaxed);
        self.count.store(0, Ordering::Release);
    }

    /// Number of shared holders.
    #[inline]
    pub fn readers(&self) -> usize {
        self.count.load(Ordering::Relaxed) & READERS
    }

    /// Is the pair held or reserved exclusively?
    #[inline]
    pub fn is_reserved(&self) -> bool {
        self.count.load(Ordering::Relaxed) & RESERVED != 0
    }

    fn lock_exclusive(&self) {
        let mut budget = WaitBudget::hot();
        let mut state = self.count.load(Ordering::Relaxed);
        loop {
            if state & RESERVED == 0 {
                match self.count.compare_exchange_weak(
                    state,
                    state | RESERVED,
                    Ordering::Acquire,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => break,
                    Err(now) => {
                        state = now;
                        continue;
                    }
                }
            }
            budget.snooze();
            state = self.count.load(Ordering::Relaxed);
        }

        // Reserved: shared holders can only leave now.
        budget.reset();
        while self.count.load(Ordering::Acquire) != RESERVED {
            budget.snooze();
        }
        self.writer.store(context_id(), Ordering::Relaxed);
    }

    fn try_lock_exclusive(&self) -> bool {
        if self
            .count
            .compare_exchange(0, RESERVED, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            self.writer.store(context_id(), Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    fn check_writer(&self) -> Result<(), LatchError> {
        let me = context_id();
        let owner = self.writer.load(Ordering::Relaxed);
        if owner != me || self.count.load(Ordering::Relaxed) != RESERVED {
            return Err(LatchError::NotOwner {
                latch: "ExclusiveLatch",
                owner,
                caller: me,
            });
        }
        Ok(())
    }

    fn try_unlock_exclusive(&self) -> Result<(), LatchError> {
        self.check_writer()?;
        self.writer.store(0, Ordering::Relaxed);
        self.count.store(0, Ordering::Release);
        Ok(())
    }

    fn try_downgrade(&self) -> Result<(), LatchError> {
        self.check_writer()?;
        self.writer.store(0, Ordering::Relaxed);
        self.count.store(1, Ordering::Release);
        Ok(())
    }
}

impl Default for SharedLatch {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SharedLatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedLatch")
            .field("readers", &self.readers())
            .field("reserved", &self.is_reserved())
            .field("writer", &self.writer.load(Ordering::Relaxed))
            .finish()
    }
}

/// The exclusive side of a [`SharedLatch`] pair.
#[derive(Clone, Copy)]
pub struct ExclusiveLatch<'a> {
    share: &'a SharedLatch,
}

impl ExclusiveLatch<'_> {
    /// Block until the calling context holds the pair exclusively.
    #[inline]
    pub fn lock(&self) {
        self.share.lock_exclusive();
    }

    /// Take the pair exclusively if it is completely free.
    #[inline]
    pub fn try_lock(&self) -> bool {
        self.share.try_lock_exclusive()
    }

    /// Release the exclusive hold.
    ///
    /// # Panics
    /// If the calling context does not hold the pair exclusively.
    pub fn unlock(&self) {
        if let Err(err) = self.try_unlock() {
            panic!("{err}");
        }
    }

    /// Release the exclusive hold, reporting misuse instead of panicking.
    #[inline]
    pub fn try_unlock(&self) -> Result<(), LatchError> {
        self.share.try_unlock_exclusive()
    }

    /// Convert the exclusive hold into a single shared hold.
    ///
    /// # Panics
    /// If the calling context does not hold the pair exclusively.
    pub fn downgrade(&self) {
        if let Err(err) = self.share.try_downgrade() {
            panic!("{err}");
        }
    }

    /// Unconditionally free both sides. Teardown only.
    #[inline]
    pub fn reset(&self) {
        self.share.reset();
    }

    /// Does the calling context hold the pair exclusively?
    pub fn is_held(&self) -> bool {
        self.share.check_writer().is_ok()
    }
}

impl fmt::Debug for ExclusiveLatch<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ExclusiveLatch").field(self.share).finish()
    }
}

// SAFETY: exclusive holds exclude every shared hold and each other;
// exclusive release is owner-checked and guards stay on their thread.
unsafe impl lock_api::RawRwLock for SharedLatch {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: SharedLatch = SharedLatch::new();

    type GuardMarker = lock_api::GuardNoSend;

    #[inline]
    fn lock_shared(&self) {
        SharedLatch::lock(self);
    }

    #[inline]
    fn try_lock_shared(&self) -> bool {
        SharedLatch::try_lock(self)
    }

    #[inline]
    unsafe fn unlock_shared(&self) {
        SharedLatch::unlock(self);
    }

    #[inline]
    fn lock_exclusive(&self) {
        SharedLatch::lock_exclusive(self);
    }

    #[inline]
    fn try_lock_exclusive(&self) -> bool {
        SharedLatch::try_lock_exclusive(self)
    }

    #[inline]
    unsafe fn unlock_exclusive(&self) {
        self.exclusive().unlock();
    }

    #[inline]
    fn is_locked(&self) -> bool {
        self.count.load(Ordering::Relaxed) != 0
    }
}

// SAFETY: downgrade keeps the pair held (one shared holder) throughout.
unsafe impl lock_api::RawRwLockDowngrade for SharedLatch {
    #[inline]
    unsafe fn downgrade(&self) {
        self.exclusive().downgrade();
    }
}
