//! `TimerEngine`: a delay queue served by one background worker.
//!
//! Entries live in an ordered map keyed by [`TimerToken`], so the head is
//! always the earliest deadline and equal deadlines keep submission order.
//! Whoever removes an entry under the queue latch owns its item and
//! completes it after releasing the latch; that makes cancel-versus-fire
//! races resolve to exactly one completion and lets callbacks re-enter the
//! engine.

use core::fmt;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tracing::{debug, error, trace, warn};

use crate::error::TimerError;
use crate::latch::LatchMutex;
use crate::timer::{Completion, Event, WorkItem};
use crate::util::{PinConfig, pin_current_thread};

/// Deadlines are clamped to this distance from now.
const FAR_FUTURE: Duration = Duration::from_secs(30 * 365 * 24 * 60 * 60);

/// Timer engine settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerConfig {
    /// Worker thread name.
    pub name: String,
    /// Delays shorter than this complete synchronously inside `delay`.
    pub min_delay: Duration,
    /// Longest worker sleep while the queue is empty or far off.
    pub max_wait: Duration,
    /// Optional CPU pinning for the worker.
    pub pin: Option<PinConfig>,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            name: "timer-engine".to_owned(),
            min_delay: Duration::from_micros(15_625),
            max_wait: Duration::from_secs(60),
            pin: None,
        }
    }
}

/// Handle to a queued entry, used for cancellation.
///
/// Tokens order by deadline, then by submission.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerToken {
    deadline: Instant,
    seq: u64,
}

impl TimerToken {
    /// When the entry is due.
    #[inline]
    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum State {
    Running,
    Stopping,
    Stopped,
}

struct TimerQueue {
    entries: BTreeMap<TimerToken, WorkItem>,
    state: State,
    next_seq: u64,
}

struct Shared {
    queue: LatchMutex<TimerQueue>,
    event: Event,
    config: TimerConfig,
}

/// Delay queue with a dedicated worker thread.
pub struct TimerEngine {
    shared: Arc<Shared>,
    worker: parking_lot::Mutex<Option<JoinHandle<()>>>,
    worker_id: ThreadId,
}

impl TimerEngine {
    /// Start an engine with the default configuration.
    pub fn start() -> Result<Self, TimerError> {
        Self::with_config(TimerConfig::default())
    }

    /// Start an engine and its worker thread.
    pub fn with_config(config: TimerConfig) -> Result<Self, TimerError> {
        let shared = Arc::new(Shared {
            queue: LatchMutex::new(TimerQueue {
                entries: BTreeMap::new(),
                state: State::Running,
                next_seq: 0,
            }),
            event: Event::new(),
            config,
        });

        let worker = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name(shared.config.name.clone())
                .spawn(move || {
                    if let Some(pin) = shared.config.pin {
                        if let Err(err) = pin_current_thread(&pin) {
                            warn!(%err, ?pin, "failed to pin timer worker");
                        }
                    }
                    run(&shared);
                })?
        };
        debug!(name = %shared.config.name, "timer engine started");

        Ok(Self {
            shared,
            worker_id: worker.thread().id(),
            worker: parking_lot::Mutex::new(Some(worker)),
        })
    }

    /// The engine's configuration.
    #[inline]
    pub fn config(&self) -> &TimerConfig {
        &self.shared.config
    }

    /// Complete `item` after `duration`.
    ///
    /// Returns `None` when the item was completed before returning: with
    /// [`Completion::Normal`] if `duration` is below the minimum delay, or
    /// with [`Completion::Cancelled`] if the engine is stopping.
    pub fn delay(&self, duration: Duration, item: WorkItem) -> Option<TimerToken> {
        let now = Instant::now();
        let mut queue = self.shared.queue.lock();
        if queue.state != State::Running {
            drop(queue);
            trace!("timer engine stopped; cancelling item");
            item.complete(Completion::Cancelled);
            return None;
        }
        if duration < self.shared.config.min_delay {
            drop(queue);
            item.complete(Completion::Normal);
            return None;
        }

        let token = TimerToken {
            deadline: now + duration.min(FAR_FUTURE),
            seq: queue.next_seq,
        };
        queue.next_seq += 1;
        let at_head = queue
            .entries
            .first_key_value()
            .is_none_or(|(head, _)| token < *head);
        queue.entries.insert(token, item);
        drop(queue);

        if at_head {
            trace!(?duration, "timer queued at head");
            self.shared.event.post();
        }
        Some(token)
    }

    /// [`delay`](Self::delay) in fractional seconds.
    ///
    /// Negative and NaN delays complete immediately; delays too large to
    /// represent are clamped.
    pub fn delay_secs(&self, seconds: f64, item: WorkItem) -> Option<TimerToken> {
        let duration = Duration::try_from_secs_f64(seconds).unwrap_or(if seconds > 0.0 {
            FAR_FUTURE
        } else {
            Duration::ZERO
        });
        self.delay(duration, item)
    }

    /// Cancel a queued entry; reports whether it was still queued.
    ///
    /// Cancelling an entry that already fired or was cancelled is a no-op.
    pub fn cancel(&self, token: TimerToken) -> bool {
        let removed = self.shared.queue.lock().entries.remove(&token);
        match removed {
            Some(item) => {
                trace!(?token, "timer cancelled");
                item.complete(Completion::Cancelled);
                true
            }
            None => false,
        }
    }

    /// Stop accepting delays, cancel everything queued and join the worker.
    ///
    /// Idempotent. Called from a completion running on the worker, it only
    /// requests the shutdown; the worker drains once the callback returns.
    pub fn stop(&self) {
        {
            let mut queue = self.shared.queue.lock();
            if queue.state == State::Running {
                queue.state = State::Stopping;
                debug!(name = %self.shared.config.name, "timer engine stopping");
            }
        }
        self.shared.event.post();

        if thread::current().id() == self.worker_id {
            return;
        }
        let mut worker = self.worker.lock();
        if let Some(handle) = worker.take() {
            if handle.join().is_err() {
                error!(name = %self.shared.config.name, "timer worker panicked");
            }
        }
    }

    /// Number of queued entries.
    pub fn pending(&self) -> usize {
        self.shared.queue.lock().entries.len()
    }

    /// Is the engine accepting delays?
    pub fn is_running(&self) -> bool {
        self.shared.queue.lock().state == State::Running
    }
}

impl Drop for TimerEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for TimerEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerEngine")
            .field("name", &self.shared.config.name)
            .field("running", &self.is_running())
            .field("pending", &self.pending())
            .finish()
    }
}

fn run(shared: &Shared) {
    let max_wait = shared.config.max_wait;
    let mut fired: SmallVec<[WorkItem; 16]> = SmallVec::new();

    loop {
        let wait = {
            let mut queue = shared.queue.lock();
            if queue.state != State::Running {
                break;
            }
            let now = Instant::now();
            while let Some(entry) = queue.entries.first_entry() {
                if entry.key().deadline > now {
                    break;
                }
                fired.push(entry.remove());
            }
            queue
                .entries
                .first_key_value()
                .map_or(max_wait, |(head, _)| {
                    head.deadline.saturating_duration_since(now).min(max_wait)
                })
        };

        if !fired.is_empty() {
            trace!(count = fired.len(), "timers fired");
            for item in fired.drain(..) {
                complete_on_worker(item, Completion::Normal);
            }
            continue;
        }

        trace!(?wait, "timer worker waiting");
        shared.event.wait(wait);
    }

    let drained = {
        let mut queue = shared.queue.lock();
        queue.state = State::Stopped;
        core::mem::take(&mut queue.entries)
    };
    debug!(
        name = %shared.config.name,
        cancelled = drained.len(),
        "timer worker exiting"
    );
    for item in drained.into_values() {
        complete_on_worker(item, Completion::Cancelled);
    }
}

/// Complete `item` on the worker thread; a panicking callback is logged and
/// the worker keeps serving the queue.
fn complete_on_worker(item: WorkItem, completion: Completion) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| item.complete(completion))) {
        let message = payload
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
            .unwrap_or("non-string panic payload");
        error!(?completion, panic = message, "timer callback panicked");
    }
}
