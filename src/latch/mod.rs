//! Latches: short-hold mutual exclusion owned by an execution context.
//!
//! - [`Latch`]: exclusive; only the owner may release it.
//! - [`RecursiveLatch`]: exclusive and reentrant for its owner.
//! - [`SharedLatch`] / [`ExclusiveLatch`]: many shared holders or one
//!   exclusive holder.
//!
//! Every variant implements [`Lockable`], so [`LatchGuard`] gives scoped
//! acquisition for all of them. [`Latch`] and [`SharedLatch`] also plug into
//! `lock_api` as [`LatchMutex`] and [`LatchRwLock`].

use core::marker::PhantomData;

mod recursive;
mod shared;
mod spin;

pub use recursive::RecursiveLatch;
pub use shared::{ExclusiveLatch, SharedLatch};
pub use spin::Latch;

/// A `Mutex<T>` protected by a [`Latch`].
pub type LatchMutex<T> = lock_api::Mutex<Latch, T>;
/// Guard for [`LatchMutex`].
pub type LatchMutexGuard<'a, T> = lock_api::MutexGuard<'a, Latch, T>;
/// An `RwLock<T>` protected by a [`SharedLatch`] pair.
pub type LatchRwLock<T> = lock_api::RwLock<SharedLatch, T>;

/// Acquire/attempt/release/reset, common to every latch variant.
pub trait Lockable {
    /// Block until acquired.
    fn lock(&self);
    /// Acquire without waiting; reports success.
    fn try_lock(&self) -> bool;
    /// Release; panics if the caller does not hold it.
    fn unlock(&self);
    /// Unconditionally free. Teardown only.
    fn reset(&self);
}

impl Lockable for Latch {
    #[inline]
    fn lock(&self) {
        Latch::lock(self)
    }
    #[inline]
    fn try_lock(&self) -> bool {
        Latch::try_lock(self)
    }
    #[inline]
    fn unlock(&self) {
        Latch::unlock(self)
    }
    #[inline]
    fn reset(&self) {
        Latch::reset(self)
    }
}

impl Lockable for RecursiveLatch {
    #[inline]
    fn lock(&self) {
        RecursiveLatch::lock(self)
    }
    #[inline]
    fn try_lock(&self) -> bool {
        RecursiveLatch::try_lock(self)
    }
    #[inline]
    fn unlock(&self) {
        RecursiveLatch::unlock(self)
    }
    #[inline]
    fn reset(&self) {
        RecursiveLatch::reset(self)
    }
}

impl Lockable for SharedLatch {
    #[inline]
    fn lock(&self) {
        SharedLatch::lock(self)
    }
    #[inline]
    fn try_lock(&self) -> bool {
        SharedLatch::try_lock(self)
    }
    #[inline]
    fn unlock(&self) {
        SharedLatch::unlock(self)
    }
    #[inline]
    fn reset(&self) {
        SharedLatch::reset(self)
    }
}

impl Lockable for ExclusiveLatch<'_> {
    #[inline]
    fn lock(&self) {
        ExclusiveLatch::lock(self)
    }
    #[inline]
    fn try_lock(&self) -> bool {
        ExclusiveLatch::try_lock(self)
    }
    #[inline]
    fn unlock(&self) {
        ExclusiveLatch::unlock(self)
    }
    #[inline]
    fn reset(&self) {
        ExclusiveLatch::reset(self)
    }
}

/// Scoped hold on any [`Lockable`]; releases on drop.
///
/// The guard is !Send: latches are released by the context that took them.
#[must_use = "the latch is released as soon as the guard is dropped"]
pub struct LatchGuard<'a, L: Lockable + ?Sized> {
    latch: &'a L,
    _marker: PhantomData<*const ()>,
}

impl<'a, L: Lockable + ?Sized> LatchGuard<'a, L> {
    /// Block until `latch` is acquired.
    #[inline]
    pub fn acquire(latch: &'a L) -> Self {
        latch.lock();
        Self {
            latch,
            _marker: PhantomData,
        }
    }

    /// Acquire `latch` if that is possible without waiting.
    #[inline]
    pub fn try_acquire(latch: &'a L) -> Option<Self> {
        latch.try_lock().then(|| Self {
            latch,
            _marker: PhantomData,
        })
    }
}

impl<L: Lockable + ?Sized> Drop for LatchGuard<'_, L> {
    #[inline]
    fn drop(&mut self) {
        self.latch.unlock();
    }
}
