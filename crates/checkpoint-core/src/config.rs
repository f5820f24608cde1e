//! Detection loop timing and matching parameters.

use std::time::Duration;

// --- Named constants (observed production values) ---
pub const MATCH_THRESHOLD: f32 = 0.4;
pub const TICK_PERIOD: Duration = Duration::from_millis(800);
pub const DEBOUNCE_INTERVAL: Duration = Duration::from_millis(1500);
pub const HOLD_DURATION: Duration = Duration::from_millis(3000);
pub const RESUME_GRACE: Duration = Duration::from_millis(500);
pub const COUNTDOWN_PERIOD: Duration = Duration::from_secs(1);
pub const HISTORY_CAPACITY: usize = 5;
pub const VOTING_WINDOW: usize = 3;
pub const EXTRACTION_TIMEOUT: Duration = Duration::from_millis(5000);

/// Parameters for one detection loop.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopConfig {
    /// A match is actionable only when its distance is strictly below this.
    pub match_threshold: f32,
    /// Period of the cheap "is it time to check" scheduler tick.
    pub tick_period: Duration,
    /// Minimum spacing between two extraction attempts.
    pub debounce_interval: Duration,
    /// How long sampling stays frozen after a confirmed match.
    pub hold_duration: Duration,
    /// Delay between hold expiry and the return to probing.
    pub resume_grace: Duration,
    pub countdown_period: Duration,
    pub history_capacity: usize,
    pub voting_window: usize,
    /// Upper bound on a single extraction call; expiry counts as a failed attempt.
    pub extraction_timeout: Duration,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            match_threshold: MATCH_THRESHOLD,
            tick_period: TICK_PERIOD,
            debounce_interval: DEBOUNCE_INTERVAL,
            hold_duration: HOLD_DURATION,
            resume_grace: RESUME_GRACE,
            countdown_period: COUNTDOWN_PERIOD,
            history_capacity: HISTORY_CAPACITY,
            voting_window: VOTING_WINDOW,
            extraction_timeout: EXTRACTION_TIMEOUT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_observed_values() {
        let config = LoopConfig::default();
        assert!((config.match_threshold - 0.4).abs() < 1e-6);
        assert_eq!(config.tick_period.as_millis(), 800);
        assert_eq!(config.debounce_interval.as_millis(), 1500);
        assert_eq!(config.hold_duration.as_millis(), 3000);
        assert_eq!(config.resume_grace.as_millis(), 500);
        assert_eq!(config.history_capacity, 5);
        assert_eq!(config.voting_window, 3);
    }
}
