//! Spin-wait budgets for latch acquisition loops.

use std::time::Duration;

/// Longest single sleep taken by [`WaitBudget::snooze`].
pub const MAX_SNOOZE: Duration = Duration::from_micros(15_625);

/// Bounded wait budget: spin, then yield, then report exhaustion.
///
/// [`step`](Self::step) is for callers that have a blocking fallback (the
/// exclusive latch parks once the budget runs out). [`snooze`](Self::snooze)
/// never gives up; past the budget it alternates yielding and sleeping for
/// an attempt-scaled duration capped at [`MAX_SNOOZE`].
#[derive(Copy, Clone, Debug)]
pub struct WaitBudget {
    spins: u32,
    yields: u32,
    spin_cap: u32,
    yield_cap: u32,
    naps: u32,
}

impl WaitBudget {
    /// Budget tuned for short critical sections under contention.
    #[inline]
    pub fn hot() -> Self {
        Self {
            spins: 0,
            yields: 0,
            spin_cap: 128,
            yield_cap: 8,
            naps: 0,
        }
    }

    /// Reset the budget counters.
    #[inline]
    pub fn reset(&mut self) {
        self.spins = 0;
        self.yields = 0;
        self.naps = 0;
    }

    /// Has the spin and yield budget been used up?
    #[inline]
    pub fn exhausted(&self) -> bool {
        self.spins >= self.spin_cap && self.yields >= self.yield_cap
    }

    /// Perform one spin or yield; returns `false` once the budget is spent.
    #[inline]
    pub fn step(&mut self) -> bool {
        if self.spins < self.spin_cap {
            core::hint::spin_loop();
            self.spins += 1;
            true
        } else if self.yields < self.yield_cap {
            std::thread::yield_now();
            self.yields += 1;
            true
        } else {
            false
        }
    }

    /// Perform one wait step without ever giving up.
    pub fn snooze(&mut self) {
        if self.step() {
            return;
        }
        self.naps = self.naps.saturating_add(1);
        if self.naps % 2 == 1 {
            std::thread::yield_now();
        } else {
            let nap = Duration::from_micros(u64::from(self.naps)).min(MAX_SNOOZE);
            std::thread::sleep(nap);
        }
    }
}

impl Default for WaitBudget {
    fn default() -> Self {
        Self {
            spins: 0,
            yields: 0,
            spin_cap: 64,
            yield_cap: 4,
            naps: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_runs_out() {
        let mut budget = WaitBudget::default();
        let mut steps = 0;
        while budget.step() {
            steps += 1;
        }
        assert_eq!(steps, 64 + 4);
        assert!(budget.exhausted());

        budget.reset();
        assert!(!budget.exhausted());
        assert!(budget.step());
    }

    #[test]
    fn snooze_keeps_going_past_the_budget() {
        let mut budget = WaitBudget::default();
        for _ in 0..100 {
            budget.snooze();
        }
        assert!(budget.exhausted());
    }
}
