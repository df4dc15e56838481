//! Drift-corrected 2 ms tick scheduling.
//!
//! The player's outer loop sleeps in short stretches (it blocks on stdin
//! for up to one tick) and cannot rely on wakeups landing on the tick
//! grid. This module keeps the grid: given a monotonic timestamp it
//! reports how many driver ticks are due and advances the deadline by
//! exactly that many tick periods, so late wakeups are caught up instead
//! of slipping the song. Catch-up is capped so a long stall (suspend,
//! scheduler starvation) cannot unleash a tick storm; the residual
//! backlog drains on subsequent calls.

/// Nanoseconds per driver tick (2 ms).
pub const TICK_NS: u64 = 2_000_000;

/// Most ticks a single wakeup may run; the cap bounds stall recovery.
pub const MAX_CATCHUP_TICKS: u32 = 50;

/// Deadline bookkeeping for the 2 ms grid.
#[derive(Debug, Clone)]
pub struct TickScheduler {
    next_deadline_ns: u64,
    tick_ns: u64,
}

impl TickScheduler {
    /// Start the grid at `now_ns`; the first tick falls one period later.
    pub fn new(now_ns: u64) -> Self {
        Self::with_tick(now_ns, TICK_NS)
    }

    /// Start a grid with a custom tick period (tests use coarse periods).
    pub fn with_tick(now_ns: u64, tick_ns: u64) -> Self {
        debug_assert!(tick_ns > 0);
        Self {
            next_deadline_ns: now_ns + tick_ns,
            tick_ns,
        }
    }

    /// Number of ticks due at `now_ns`, capped at [`MAX_CATCHUP_TICKS`].
    ///
    /// Advances the internal deadline by the returned count, so calling in
    /// a loop drains any backlog without double-counting.
    pub fn due_ticks(&mut self, now_ns: u64) -> u32 {
        if now_ns < self.next_deadline_ns {
            return 0;
        }
        let behind = now_ns - self.next_deadline_ns;
        let due = (behind / self.tick_ns + 1).min(u64::from(MAX_CATCHUP_TICKS)) as u32;
        self.next_deadline_ns += u64::from(due) * self.tick_ns;
        due
    }

    /// Upcoming deadline, for diagnostics.
    pub fn next_deadline_ns(&self) -> u64 {
        self.next_deadline_ns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nothing_due_before_the_deadline() {
        let mut s = TickScheduler::new(0);
        assert_eq!(s.due_ticks(TICK_NS - 1), 0);
        assert_eq!(s.due_ticks(TICK_NS - 1), 0);
    }

    #[test]
    fn one_tick_per_period_when_on_time() {
        let mut s = TickScheduler::new(0);
        let mut total = 0;
        for i in 1..=100u64 {
            total += s.due_ticks(i * TICK_NS);
        }
        assert_eq!(total, 100);
    }

    #[test]
    fn late_wakeup_catches_up_missed_ticks() {
        let mut s = TickScheduler::new(0);
        // Waking 10 periods late runs the 10 missed ticks plus the due one.
        assert_eq!(s.due_ticks(11 * TICK_NS), 11);
        // The grid is intact: the next period yields exactly one.
        assert_eq!(s.due_ticks(12 * TICK_NS), 1);
    }

    #[test]
    fn catchup_is_capped_and_backlog_drains() {
        let mut s = TickScheduler::new(0);
        assert_eq!(s.due_ticks(1000 * TICK_NS), MAX_CATCHUP_TICKS);
        // Deadline advanced by only the capped amount; the rest remains due.
        assert_eq!(s.due_ticks(1000 * TICK_NS), MAX_CATCHUP_TICKS);
    }

    #[test]
    fn deadline_advances_by_exactly_due_times_tick() {
        let mut s = TickScheduler::new(0);
        let before = s.next_deadline_ns();
        let due = s.due_ticks(5 * TICK_NS + 17);
        assert_eq!(due, 5);
        assert_eq!(s.next_deadline_ns(), before + 5 * TICK_NS);
    }
}
