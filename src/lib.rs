#![forbid(unsafe_op_in_unsafe_fn)]
#![deny(missing_docs)]

//! Concurrency core: owner-checked latches, a pooled fixed-size block
//! allocator with a lock-free fast path, and a delay-queue timer engine
//! served by one background worker.

pub mod alloc;
pub mod error;
pub mod latch;
pub mod timer;
pub mod util;

/// Commonly used types.
pub mod prelude {
    pub use crate::alloc::{Allocator, BlockAllocator, PoolStats, SystemAllocator};
    pub use crate::error::{AllocError, LatchError, TimerError};
    pub use crate::latch::{
        ExclusiveLatch, Latch, LatchGuard, LatchMutex, LatchMutexGuard, LatchRwLock, Lockable,
        RecursiveLatch, SharedLatch,
    };
    pub use crate::timer::{Completion, Event, TimerConfig, TimerEngine, TimerToken, Waiter, WorkItem};
    pub use crate::util::PinConfig;
}
