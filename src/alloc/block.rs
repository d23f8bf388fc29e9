//! `BlockAllocator`: fixed-size elements pooled in allocator-owned blocks.
//!
//! Three tiers, fastest first:
//! - fast slots: a small array of single-element exchange points, claimed
//!   and filled with one compare-and-swap each;
//! - free list: a stack of released elements linked through their own
//!   storage. Pushes are lock-free; pops take the block latch so a node
//!   cannot be reserved twice while a concurrent push rewrites the head;
//! - growth: a new block is carved into elements, the first is returned
//!   and the rest are pushed onto the free list in one splice.
//!
//! Elements never go back to the heap individually. Blocks are released in
//! bulk when the allocator is closed or dropped, after a consistency check
//! that every element is accounted for exactly once.

use core::fmt;
use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicPtr, AtomicU64, Ordering};
use std::alloc::{Layout, alloc, dealloc};

use serde::Serialize;
use tracing::{debug, error};

use crate::alloc::{Allocator, ELEMENT_ALIGN, round_up};
use crate::error::AllocError;
use crate::latch::LatchMutex;

/// Number of lock-free fast slots per allocator.
pub const FAST_SLOTS: usize = 8;
/// Minimum number of elements carved from each block.
pub const MIN_ELEMENTS: usize = 32;
/// Block sizes are rounded up to a multiple of this.
const BLOCK_ROUNDING: usize = 4096;
/// Per-block bookkeeping, ahead of the first element.
const HEADER: usize = round_up(size_of::<BlockHeader>(), ELEMENT_ALIGN);

/// A released element, reinterpreted as a free-list link.
#[repr(C)]
struct FreeElement {
    next: *mut FreeElement,
}

#[repr(C)]
struct BlockHeader {
    next: *mut BlockHeader,
}

/// Chain of owned blocks; guarded by the allocator's latch.
struct Blocks {
    head: *mut BlockHeader,
    count: usize,
}

// SAFETY: the chain is only reached through the latch that owns it.
unsafe impl Send for Blocks {}

/// Geometry and traffic counters of a [`BlockAllocator`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Element size after alignment rounding.
    pub element_size: usize,
    /// Bytes per block.
    pub block_size: usize,
    /// Elements carved from each block.
    pub elements_per_block: usize,
    /// Blocks currently owned.
    pub blocks: usize,
    /// Total elements across owned blocks.
    pub capacity: usize,
    /// Successful `get` calls.
    pub gets: u64,
    /// Successful `put` calls.
    pub puts: u64,
}

impl PoolStats {
    /// Elements handed out and not yet returned.
    pub fn outstanding(&self) -> u64 {
        self.gets.saturating_sub(self.puts)
    }
}

/// Fixed-size pooled allocator.
pub struct BlockAllocator {
    element_size: usize,
    block_size: usize,
    per_block: usize,
    layout: Layout,
    fast: [AtomicPtr<FreeElement>; FAST_SLOTS],
    free: AtomicPtr<FreeElement>,
    blocks: LatchMutex<Blocks>,
    gets: AtomicU64,
    puts: AtomicU64,
    released: bool,
}

impl BlockAllocator {
    /// Create an allocator for `element_size`-byte elements.
    ///
    /// The element size is rounded up to [`ELEMENT_ALIGN`]. The block size
    /// is `recommended_block_size` raised to hold at least
    /// [`MIN_ELEMENTS`] elements plus bookkeeping and rounded up to 4 KiB;
    /// zero picks that minimum. No memory is allocated until the first
    /// `get`.
    pub fn new(element_size: usize, recommended_block_size: usize) -> Result<Self, AllocError> {
        let too_big = AllocError::InvalidSize { size: element_size };
        let element_size = element_size
            .max(size_of::<FreeElement>())
            .checked_next_multiple_of(ELEMENT_ALIGN)
            .ok_or(too_big.clone())?;
        let minimum = element_size
            .checked_mul(MIN_ELEMENTS)
            .and_then(|bytes| bytes.checked_add(HEADER))
            .ok_or(too_big.clone())?;
        let block_size = recommended_block_size
            .max(minimum)
            .checked_next_multiple_of(BLOCK_ROUNDING)
            .ok_or(too_big.clone())?;
        let layout = Layout::from_size_align(block_size, ELEMENT_ALIGN).map_err(|_| too_big)?;

        Ok(Self {
            element_size,
            block_size,
            per_block: (block_size - HEADER) / element_size,
            layout,
            fast: [const { AtomicPtr::new(ptr::null_mut()) }; FAST_SLOTS],
            free: AtomicPtr::new(ptr::null_mut()),
            blocks: LatchMutex::new(Blocks {
                head: ptr::null_mut(),
                count: 0,
            }),
            gets: AtomicU64::new(0),
            puts: AtomicU64::new(0),
            released: false,
        })
    }

    /// Element size after alignment rounding.
    #[inline]
    pub fn element_size(&self) -> usize {
        self.element_size
    }

    /// Bytes per block.
    #[inline]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Elements carved from each block.
    #[inline]
    pub fn elements_per_block(&self) -> usize {
        self.per_block
    }

    /// Allocate one element.
    ///
    /// `size` is either zero or a size that rounds to the element size.
    /// Never returns an empty result: exhaustion grows the pool, and only
    /// heap failure is reported as [`AllocError::OutOfMemory`].
    pub fn get(&self, size: usize) -> Result<NonNull<u8>, AllocError> {
        self.check_size(size)?;
        let element = self.take()?;
        self.gets.fetch_add(1, Ordering::Relaxed);
        Ok(element)
    }

    /// Return an element for reuse.
    ///
    /// # Safety
    /// `ptr` must come from [`get`](Self::get) on this allocator, must not
    /// have been returned already, and must not be used afterwards.
    pub unsafe fn put(&self, ptr: NonNull<u8>, size: usize) -> Result<(), AllocError> {
        self.check_size(size)?;
        let node = ptr.as_ptr().cast::<FreeElement>();
        self.puts.fetch_add(1, Ordering::Relaxed);

        for slot in &self.fast {
            if slot.load(Ordering::Relaxed).is_null()
                && slot
                    .compare_exchange(ptr::null_mut(), node, Ordering::Release, Ordering::Relaxed)
                    .is_ok()
            {
                return Ok(());
            }
        }
        self.push_chain(node, node);
        Ok(())
    }

    /// Snapshot of geometry and counters.
    pub fn stats(&self) -> PoolStats {
        let blocks = self.blocks.lock().count;
        PoolStats {
            element_size: self.element_size,
            block_size: self.block_size,
            elements_per_block: self.per_block,
            blocks,
            capacity: blocks * self.per_block,
            gets: self.gets.load(Ordering::Relaxed),
            puts: self.puts.load(Ordering::Relaxed),
        }
    }

    /// Run the teardown consistency check and release every block.
    ///
    /// Returns [`AllocError::Leak`] if elements are still outstanding and
    /// [`AllocError::DoubleRelease`] if an element was returned twice. The
    /// storage is released either way.
    pub fn close(mut self) -> Result<(), AllocError> {
        let verdict = self.audit();
        self.release();
        verdict
    }

    fn check_size(&self, size: usize) -> Result<(), AllocError> {
        if size == 0 {
            return Ok(());
        }
        if size > self.element_size
            || round_up(size.max(size_of::<FreeElement>()), ELEMENT_ALIGN) != self.element_size
        {
            return Err(AllocError::SizeMismatch {
                expected: self.element_size,
                actual: size,
            });
        }
        Ok(())
    }

    fn take(&self) -> Result<NonNull<u8>, AllocError> {
        for slot in &self.fast {
            let element = slot.load(Ordering::Relaxed);
            if !element.is_null()
                && slot
                    .compare_exchange(element, ptr::null_mut(), Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
            {
                // SAFETY: only non-null pointers are stored in fast slots.
                return Ok(unsafe { NonNull::new_unchecked(element.cast()) });
            }
        }

        let mut blocks = self.blocks.lock();
        if let Some(element) = self.pop_free(&mut blocks) {
            return Ok(element);
        }
        self.grow(&mut blocks)
    }

    /// Pop the free list. Holding the latch (witnessed by `_held`) makes
    /// this the only popper, so the head cannot be recycled under us.
    fn pop_free(&self, _held: &mut Blocks) -> Option<NonNull<u8>> {
        let mut top = self.free.load(Ordering::Acquire);
        loop {
            let node = NonNull::new(top)?;
            // SAFETY: a linked node stays linked until a popper removes it,
            // and we are the only popper; its link was published with
            // Release by the push that linked it.
            let next = unsafe { (*node.as_ptr()).next };
            match self
                .free
                .compare_exchange_weak(top, next, Ordering::Acquire, Ordering::Acquire)
            {
                Ok(_) => return Some(node.cast()),
                Err(now) => top = now,
            }
        }
    }

    /// Push the chain `head..=tail` (already linked internally).
    fn push_chain(&self, head: *mut FreeElement, tail: *mut FreeElement) {
        let mut top = self.free.load(Ordering::Relaxed);
        loop {
            // SAFETY: the chain is owned by the caller until it is published.
            unsafe { (*tail).next = top };
            match self
                .free
                .compare_exchange_weak(top, head, Ordering::Release, Ordering::Relaxed)
            {
                Ok(_) => return,
                Err(now) => top = now,
            }
        }
    }

    #[cold]
    fn grow(&self, blocks: &mut Blocks) -> Result<NonNull<u8>, AllocError> {
        // SAFETY: the layout has a non-zero size.
        let base = unsafe { alloc(self.layout) };
        if base.is_null() {
            return Err(AllocError::OutOfMemory {
                size: self.block_size,
            });
        }

        let header = base.cast::<BlockHeader>();
        // SAFETY: the block is fresh, aligned and at least HEADER bytes long.
        unsafe { header.write(BlockHeader { next: blocks.head }) };
        blocks.head = header;
        blocks.count += 1;

        let element_size = self.element_size;
        // SAFETY: every index below per_block lies inside the block.
        let element = |index: usize| unsafe {
            base.add(HEADER + index * element_size)
                .cast::<FreeElement>()
        };
        let last = self.per_block - 1;
        if last > 0 {
            for index in 1..last {
                // SAFETY: the element is inside the fresh block and aligned.
                unsafe {
                    element(index).write(FreeElement {
                        next: element(index + 1),
                    })
                };
            }
            self.push_chain(element(1), element(last));
        }

        debug!(
            blocks = blocks.count,
            block_size = self.block_size,
            elements = self.per_block,
            "block allocator grew"
        );
        // SAFETY: derived from a non-null block pointer.
        Ok(unsafe { NonNull::new_unchecked(element(0).cast()) })
    }

    /// Count the free elements against the capacity of the owned blocks.
    fn audit(&mut self) -> Result<(), AllocError> {
        let expected = self.blocks.get_mut().count * self.per_block;
        let mut found = self
            .fast
            .iter_mut()
            .filter(|slot| !slot.load(Ordering::Relaxed).is_null())
            .count();

        // A double release can turn the list into a cycle; stop once the
        // count is already conclusive.
        let mut node = *self.free.get_mut();
        while !node.is_null() && found <= expected {
            found += 1;
            // SAFETY: exclusive access; linked nodes live in owned blocks.
            node = unsafe { (*node).next };
        }

        match found.cmp(&expected) {
            core::cmp::Ordering::Greater => Err(AllocError::DoubleRelease { expected, found }),
            core::cmp::Ordering::Less => Err(AllocError::Leak { expected, found }),
            core::cmp::Ordering::Equal => Ok(()),
        }
    }

    fn release(&mut self) {
        let layout = self.layout;
        let blocks = self.blocks.get_mut();
        let released = blocks.count;
        let mut block = blocks.head;
        while !block.is_null() {
            // SAFETY: every block on the chain was allocated with `layout`
            // and is released exactly once.
            unsafe {
                let next = (*block).next;
                dealloc(block.cast(), layout);
                block = next;
            }
        }
        blocks.head = ptr::null_mut();
        blocks.count = 0;

        for slot in &mut self.fast {
            *slot.get_mut() = ptr::null_mut();
        }
        *self.free.get_mut() = ptr::null_mut();
        self.released = true;
        debug!(blocks = released, "block allocator released");
    }
}

impl Allocator for BlockAllocator {
    #[inline]
    fn get(&self, size: usize) -> Result<NonNull<u8>, AllocError> {
        BlockAllocator::get(self, size)
    }

    #[inline]
    unsafe fn put(&self, ptr: NonNull<u8>, size: usize) -> Result<(), AllocError> {
        // SAFETY: forwarded from the caller.
        unsafe { BlockAllocator::put(self, ptr, size) }
    }
}

impl Drop for BlockAllocator {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let verdict = self.audit();
        self.release();
        if let Err(err) = verdict {
            if std::thread::panicking() {
                error!(%err, "block allocator teardown check failed while unwinding");
            } else {
                panic!("block allocator teardown: {err}");
            }
        }
    }
}

impl fmt::Debug for BlockAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockAllocator")
            .field("element_size", &self.element_size)
            .field("block_size", &self.block_size)
            .field("elements_per_block", &self.per_block)
            .finish_non_exhaustive()
    }
}
