//! Free-running periodic actions for cooperative loops.

use embassy_time::{Duration, Instant};

/// A periodic action measured from its own last fire time.
///
/// The loop polls it with the current time; nothing ever waits on it. An
/// action is due once strictly more than `period` has elapsed since it last
/// fired. Drift is tolerated: the next period is measured from the time the
/// action actually ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Periodic {
    period: Duration,
    last_fire: Instant,
}

impl Periodic {
    pub const fn new(period: Duration, start: Instant) -> Self {
        Self {
            period,
            last_fire: start,
        }
    }

    pub fn is_due(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_fire) > self.period
    }

    /// Returns `true` and restarts the period if the action is due.
    pub fn poll(&mut self, now: Instant) -> bool {
        if self.is_due(now) {
            self.last_fire = now;
            true
        } else {
            false
        }
    }

    /// Restart the period without firing.
    pub fn restart(&mut self, now: Instant) {
        self.last_fire = now;
    }

    /// Time left until the action becomes due.
    pub fn remaining(&self, now: Instant) -> Duration {
        let elapsed = now.saturating_duration_since(self.last_fire);
        // +1 tick because due means strictly greater than the period
        (self.period + Duration::from_ticks(1))
            .checked_sub(elapsed)
            .unwrap_or(Duration::from_ticks(0))
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn last_fire(&self) -> Instant {
        self.last_fire
    }
}
