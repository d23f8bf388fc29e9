use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Binary auto-reset event.
///
/// `post` sets the event and wakes one waiter; a successful `wait` clears
/// it. Posts made while already set coalesce.
#[derive(Debug, Default)]
pub struct Event {
    set: Mutex<bool>,
    cond: Condvar,
}

impl Event {
    /// Create an unset event.
    pub const fn new() -> Self {
        Self {
            set: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    /// Set the event.
    pub fn post(&self) {
        let mut set = self.set.lock();
        *set = true;
        self.cond.notify_one();
    }

    /// Wait until the event is set or `timeout` elapses; reports whether it
    /// was set. The event is cleared on success.
    pub fn wait(&self, timeout: Duration) -> bool {
        let mut set = self.set.lock();
        match Instant::now().checked_add(timeout) {
            Some(deadline) => {
                while !*set {
                    if self.cond.wait_until(&mut set, deadline).timed_out() {
                        break;
                    }
                }
            }
            None => {
                while !*set {
                    self.cond.wait(&mut set);
                }
            }
        }
        core::mem::replace(&mut *set, false)
    }

    /// Clear the event without waiting.
    pub fn reset(&self) {
        *self.set.lock() = false;
    }
}
