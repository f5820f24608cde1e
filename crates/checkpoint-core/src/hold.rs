//! Timed suspension of detection after a confirmed match.

use std::time::{Duration, Instant};

/// Whole seconds left, rounded up.
fn ceil_secs(remaining: Duration) -> u64 {
    let millis = remaining.as_millis() as u64;
    millis.div_ceil(1000)
}

/// An active hold: sampling stays frozen until `until`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HoldWindow {
    until: Instant,
    remaining_secs: u64,
}

/// Outcome of one countdown tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HoldTick {
    pub remaining_secs: u64,
    pub expired: bool,
}

impl HoldWindow {
    /// Open a window lasting `duration` from `now`.
    pub fn start(now: Instant, duration: Duration) -> Self {
        Self {
            until: now + duration,
            remaining_secs: ceil_secs(duration),
        }
    }

    /// Recompute the countdown for `now`.
    pub fn tick(&mut self, now: Instant) -> HoldTick {
        self.remaining_secs = ceil_secs(self.until.saturating_duration_since(now));
        HoldTick {
            remaining_secs: self.remaining_secs,
            expired: self.remaining_secs == 0,
        }
    }

    /// Countdown for display, as of the last tick.
    pub fn remaining_secs(&self) -> u64 {
        self.remaining_secs
    }
}
