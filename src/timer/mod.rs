//! Delayed completion of work items.
//!
//! A [`TimerEngine`] owns one worker thread and a queue of pending
//! [`WorkItem`]s ordered by deadline. Each item completes exactly once,
//! either with [`Completion::Normal`] when its deadline passes or with
//! [`Completion::Cancelled`] when it is cancelled or the engine stops.
//!
//! ```
//! use std::time::Duration;
//! use spindle::timer::{Completion, TimerEngine, WorkItem};
//!
//! let engine = TimerEngine::start().unwrap();
//! let (item, waiter) = WorkItem::waitable();
//! engine.delay(Duration::from_millis(20), item);
//! assert_eq!(waiter.wait(), Completion::Normal);
//! ```

mod engine;
mod event;
mod item;

pub use engine::{TimerConfig, TimerEngine, TimerToken};
pub use event::Event;
pub use item::{Completion, Waiter, WorkItem};
