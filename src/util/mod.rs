//! Thread identity, wait budgets and CPU pinning shared by the latches
//! and the timer worker.

/// Optional CPU pinning for worker threads.
pub mod affinity;
/// Execution-context identity.
pub mod thread_id;
/// Wait budget utilities for spin-wait loops.
pub mod wait;

pub use affinity::{PinConfig, pin_current_thread};
pub use thread_id::context_id;
pub use wait::WaitBudget;
