//! Error types for latches, allocators and the timer engine.

use std::io;

/// Misuse of a latch.
///
/// Latch release is fail-fast: `unlock()` panics with one of these. The
/// `try_unlock()` variants return it instead.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LatchError {
    /// Released by a context that does not own it.
    #[error("{latch} released by context {caller}, but owned by context {owner}")]
    NotOwner {
        /// Latch kind.
        latch: &'static str,
        /// Current owner, zero when free.
        owner: usize,
        /// The releasing context.
        caller: usize,
    },

    /// Shared side released while no shared holder exists.
    #[error("{latch} released while not held")]
    NotHeld {
        /// Latch kind.
        latch: &'static str,
    },
}

/// Allocator failures and teardown consistency violations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AllocError {
    /// Explicit size does not match the allocator's element size.
    #[error("size {actual} does not match element size {expected}")]
    SizeMismatch {
        /// Configured (rounded) element size.
        expected: usize,
        /// Size passed by the caller.
        actual: usize,
    },

    /// Size that no allocation can satisfy.
    #[error("invalid allocation size {size}")]
    InvalidSize {
        /// Requested size.
        size: usize,
    },

    /// The heap refused to grow.
    #[error("out of memory allocating {size} bytes")]
    OutOfMemory {
        /// Requested size.
        size: usize,
    },

    /// More free elements than capacity at teardown.
    #[error("double release: {found} free elements, capacity {expected}")]
    DoubleRelease {
        /// Capacity implied by the owned blocks.
        expected: usize,
        /// Free elements counted (stops counting past `expected`).
        found: usize,
    },

    /// Fewer free elements than capacity at teardown.
    #[error("leak: {found} free elements, capacity {expected}")]
    Leak {
        /// Capacity implied by the owned blocks.
        expected: usize,
        /// Free elements counted.
        found: usize,
    },
}

/// Timer engine failures.
#[derive(Debug, thiserror::Error)]
pub enum TimerError {
    /// The worker thread could not be started.
    #[error("failed to spawn timer worker: {0}")]
    Spawn(#[from] io::Error),
}
