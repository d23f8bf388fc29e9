//! Element allocators.
//!
//! [`BlockAllocator`] hands out fixed-size elements carved from blocks it
//! owns and keeps released elements for reuse until it is dropped.
//! [`SystemAllocator`] goes to the global heap for every request.

use core::ptr::NonNull;

use crate::error::AllocError;

mod block;
mod system;

pub use block::{BlockAllocator, FAST_SLOTS, MIN_ELEMENTS, PoolStats};
pub use system::SystemAllocator;

/// Alignment of every element handed out by this module.
pub const ELEMENT_ALIGN: usize = 16;

/// Storage source for raw elements.
pub trait Allocator: Send + Sync {
    /// Allocate `size` bytes, aligned to [`ELEMENT_ALIGN`].
    ///
    /// Fixed-size allocators accept `0` as "the configured size".
    fn get(&self, size: usize) -> Result<NonNull<u8>, AllocError>;

    /// Return an element obtained from [`get`](Self::get).
    ///
    /// # Safety
    /// `ptr` must come from `get` on this allocator with the same `size`
    /// (or `0` for fixed-size allocators), must not have been returned
    /// already, and must not be used afterwards.
    unsafe fn put(&self, ptr: NonNull<u8>, size: usize) -> Result<(), AllocError>;
}

/// Round `size` up to a multiple of `align` (a power of two).
#[inline]
pub(crate) const fn round_up(size: usize, align: usize) -> usize {
    (size + align - 1) & !(align - 1)
}
