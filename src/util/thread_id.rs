use std::sync::atomic::{AtomicUsize, Ordering};

static CONTEXT_COUNTER: AtomicUsize = AtomicUsize::new(1);

thread_local! {
    /// The execution-context identity of the current thread.
    static CONTEXT_ID: usize = CONTEXT_COUNTER.fetch_add(1, Ordering::Relaxed);
}

/// Identity of the calling execution context (one per OS thread).
///
/// Never zero, so zero can mean "free" in a latch word. Identities are not
/// reused while the process lives.
#[inline]
pub fn context_id() -> usize {
    CONTEXT_ID.with(|id| *id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_stable_and_distinct() {
        let here = context_id();
        assert_ne!(here, 0);
        assert_eq!(here, context_id());
        let there = std::thread::spawn(context_id).join().unwrap();
        assert_ne!(here, there);
    }
}
