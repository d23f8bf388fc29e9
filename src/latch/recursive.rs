//! `RecursiveLatch`: a [`Latch`] its owner may take repeatedly.

use core::fmt;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::error::LatchError;
use crate::latch::Latch;
use crate::util::context_id;

/// Reentrant exclusive latch.
///
/// The owner may lock it again without blocking; every `lock` needs a
/// matching `unlock` before another context can acquire it. Only the
/// initial handoff is a compare-and-swap; the depth counter is touched by
/// the owner alone (relaxed loads and stores, no read-modify-write).
pub struct RecursiveLatch {
    latch: Latch,
    depth: AtomicUsize,
}

impl RecursiveLatch {
    /// Create a free latch.
    #[inline]
    pub const fn new() -> Self {
        Self {
            latch: Latch::new(),
            depth: AtomicUsize::new(0),
        }
    }

    /// Block until the calling context owns the latch, or deepen an
    /// existing hold.
    pub fn lock(&self) {
        if !self.reenter() {
            self.latch.lock();
            self.depth.store(1, Ordering::Relaxed);
        }
    }

    /// Take the latch without waiting; always succeeds for the owner.
    pub fn try_lock(&self) -> bool {
        if self.reenter() {
            return true;
        }
        if self.latch.try_lock() {
            self.depth.store(1, Ordering::Relaxed);
            return true;
        }
        false
    }

    /// Undo one `lock`; the latch is freed when the depth reaches zero.
    ///
    /// # Panics
    /// If the calling context does not own the latch.
    pub fn unlock(&self) {
        if let Err(err) = self.try_unlock() {
            panic!("{err}");
        }
    }

    /// Undo one `lock`, reporting misuse instead of panicking.
    pub fn try_unlock(&self) -> Result<(), LatchError> {
        if !self.latch.is_held() {
            return Err(LatchError::NotOwner {
                latch: "RecursiveLatch",
                owner: self.latch.owner(),
                caller: context_id(),
            });
        }
        let depth = self.depth.load(Ordering::Relaxed) - 1;
        self.depth.store(depth, Ordering::Relaxed);
        if depth == 0 {
            self.latch.try_unlock()?;
        }
        Ok(())
    }

    /// Unconditionally free the latch. Teardown only.
    pub fn reset(&self) {
        self.depth.store(0, Ordering::Relaxed);
        self.latch.reset();
    }

    /// Number of outstanding `lock` calls by the calling context.
    pub fn depth(&self) -> usize {
        if self.latch.is_held() {
            self.depth.load(Ordering::Relaxed)
        } else {
            0
        }
    }

    /// Is the latch owned by anyone?
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.latch.is_locked()
    }

    /// Is the latch owned by the calling context?
    #[inline]
    pub fn is_held(&self) -> bool {
        self.latch.is_held()
    }

    #[inline]
    fn reenter(&self) -> bool {
        if self.latch.is_held() {
            let depth = self.depth.load(Ordering::Relaxed);
            self.depth.store(depth + 1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }
}

impl Default for RecursiveLatch {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RecursiveLatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecursiveLatch")
            .field("owner", &self.latch.owner())
            .finish()
    }
}
