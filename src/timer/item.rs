//! Work items: one-shot completions with a normal or cancelled outcome.

use core::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::warn;

/// Outcome delivered to a [`WorkItem`].
///
/// Cancellation is a regular outcome, not an error.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Completion {
    /// The item ran to its deadline.
    Normal,
    /// The item was cancelled, or its engine shut down first.
    Cancelled,
}

impl Completion {
    /// Is this the cancellation outcome?
    #[inline]
    pub fn is_cancelled(self) -> bool {
        self == Completion::Cancelled
    }
}

type Callback = Box<dyn FnOnce(Completion) + Send + 'static>;

/// A unit of deferred work, completed exactly once.
///
/// Completion consumes the item. An item dropped without being completed
/// completes itself with [`Completion::Cancelled`].
pub struct WorkItem {
    callback: Option<Callback>,
}

impl WorkItem {
    /// Wrap `f`; it runs on whichever thread completes the item.
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce(Completion) + Send + 'static,
    {
        Self {
            callback: Some(Box::new(f)),
        }
    }

    /// An item paired with a [`Waiter`] that observes its completion.
    pub fn waitable() -> (Self, Waiter) {
        let slot = Arc::new(Slot {
            outcome: Mutex::new(None),
            done: Condvar::new(),
        });
        let waiter = Waiter {
            slot: Arc::clone(&slot),
        };
        let item = Self::new(move |completion| {
            *slot.outcome.lock() = Some(completion);
            slot.done.notify_all();
        });
        (item, waiter)
    }

    /// Deliver `completion`.
    pub fn complete(mut self, completion: Completion) {
        if let Some(callback) = self.callback.take() {
            callback(completion);
        }
    }
}

impl Drop for WorkItem {
    fn drop(&mut self) {
        if let Some(callback) = self.callback.take() {
            warn!("work item dropped without completion; cancelling");
            callback(Completion::Cancelled);
        }
    }
}

impl fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkItem")
            .field("pending", &self.callback.is_some())
            .finish()
    }
}

struct Slot {
    outcome: Mutex<Option<Completion>>,
    done: Condvar,
}

/// Observer half of [`WorkItem::waitable`].
pub struct Waiter {
    slot: Arc<Slot>,
}

impl Waiter {
    /// Block until the item completes.
    pub fn wait(&self) -> Completion {
        let mut outcome = self.slot.outcome.lock();
        loop {
            if let Some(completion) = *outcome {
                return completion;
            }
            self.slot.done.wait(&mut outcome);
        }
    }

    /// Block until the item completes or `timeout` elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Completion> {
        let deadline = Instant::now().checked_add(timeout);
        let mut outcome = self.slot.outcome.lock();
        loop {
            if let Some(completion) = *outcome {
                return Some(completion);
            }
            match deadline {
                Some(deadline) => {
                    if self.slot.done.wait_until(&mut outcome, deadline).timed_out() {
                        return *outcome;
                    }
                }
                None => self.slot.done.wait(&mut outcome),
            }
        }
    }

    /// The outcome, if the item has completed.
    pub fn try_result(&self) -> Option<Completion> {
        *self.slot.outcome.lock()
    }
}

impl fmt::Debug for Waiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Waiter")
            .field("outcome", &self.try_result())
            .finish()
    }
}
