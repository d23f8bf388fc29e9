use core::ptr::NonNull;
use std::alloc::{Layout, alloc, dealloc};

use crate::alloc::{Allocator, ELEMENT_ALIGN};
use crate::error::AllocError;

/// Allocator backed directly by the global heap.
///
/// Every `get` is a heap allocation and every `put` a heap release; used as
/// the baseline against [`BlockAllocator`](super::BlockAllocator).
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemAllocator;

impl SystemAllocator {
    fn layout(size: usize) -> Result<Layout, AllocError> {
        if size == 0 {
            return Err(AllocError::InvalidSize { size });
        }
        Layout::from_size_align(size, ELEMENT_ALIGN).map_err(|_| AllocError::InvalidSize { size })
    }
}

impl Allocator for SystemAllocator {
    fn get(&self, size: usize) -> Result<NonNull<u8>, AllocError> {
        let layout = Self::layout(size)?;
        // SAFETY: layout has a non-zero size.
        let ptr = unsafe { alloc(layout) };
        NonNull::new(ptr).ok_or(AllocError::OutOfMemory { size })
    }

    unsafe fn put(&self, ptr: NonNull<u8>, size: usize) -> Result<(), AllocError> {
        let layout = Self::layout(size)?;
        // SAFETY: the caller guarantees ptr came from `get(size)`, which used
        // this same layout.
        unsafe { dealloc(ptr.as_ptr(), layout) };
        Ok(())
    }
}
