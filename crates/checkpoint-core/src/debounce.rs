//! Spacing and mutual exclusion for extraction attempts.

use std::time::{Duration, Instant};

/// True when at least `min_interval` has passed since `last_attempt`.
///
/// With no previous attempt the answer is always yes.
pub fn should_attempt(now: Instant, last_attempt: Option<Instant>, min_interval: Duration) -> bool {
    match last_attempt {
        Some(last) => now.saturating_duration_since(last) >= min_interval,
        None => true,
    }
}

/// Gate in front of the extraction capability.
///
/// An attempt may begin only when the debounce interval has elapsed and no
/// other attempt is in flight. The attempt timestamp is recorded when the
/// attempt begins, not when it settles.
#[derive(Debug, Clone)]
pub struct Debouncer {
    min_interval: Duration,
    last_attempt: Option<Instant>,
    in_flight: bool,
}

/// Why [`Debouncer::try_begin`] refused an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refusal {
    InFlight,
    TooSoon,
}

impl Debouncer {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_attempt: None,
            in_flight: false,
        }
    }

    /// Mark an attempt as started at `now`, or say why it may not start.
    pub fn try_begin(&mut self, now: Instant) -> Result<(), Refusal> {
        if self.in_flight {
            return Err(Refusal::InFlight);
        }
        if !should_attempt(now, self.last_attempt, self.min_interval) {
            return Err(Refusal::TooSoon);
        }
        self.last_attempt = Some(now);
        self.in_flight = true;
        Ok(())
    }

    /// Clear the in-flight flag once the attempt has settled, whatever the outcome.
    pub fn settle(&mut self) {
        self.in_flight = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_millis(1500);

    #[test]
    fn test_first_attempt_allowed() {
        let now = Instant::now();
        assert!(should_attempt(now, None, INTERVAL));
        assert_eq!(Debouncer::new(INTERVAL).try_begin(now), Ok(()));
    }

    #[test]
    fn test_second_attempt_within_interval_refused() {
        let t0 = Instant::now();
        let mut debouncer = Debouncer::new(INTERVAL);
        assert_eq!(debouncer.try_begin(t0), Ok(()));
        debouncer.settle();

        for ms in [0u64, 1, 800, 1499] {
            assert_eq!(
                debouncer.try_begin(t0 + Duration::from_millis(ms)),
                Err(Refusal::TooSoon),
                "attempt at +{ms}ms should be debounced"
            );
        }
        assert_eq!(debouncer.try_begin(t0 + INTERVAL), Ok(()));
    }

    #[test]
    fn test_in_flight_blocks_regardless_of_elapsed_time() {
        let t0 = Instant::now();
        let mut debouncer = Debouncer::new(INTERVAL);
        debouncer.try_begin(t0).unwrap();

        let much_later = t0 + Duration::from_secs(60);
        assert_eq!(debouncer.try_begin(much_later), Err(Refusal::InFlight));
        assert!(debouncer.in_flight);

        debouncer.settle();
        assert_eq!(debouncer.try_begin(much_later), Ok(()));
    }

    #[test]
    fn test_timestamp_recorded_at_begin_not_settle() {
        let t0 = Instant::now();
        let mut debouncer = Debouncer::new(INTERVAL);
        debouncer.try_begin(t0).unwrap();
        // Slow extraction settles 2s later; the next tick may go immediately.
        debouncer.settle();
        assert_eq!(debouncer.last_attempt, Some(t0));
        assert_eq!(debouncer.try_begin(t0 + Duration::from_millis(2000)), Ok(()));
    }

    #[test]
    fn test_refused_attempt_does_not_move_timestamp() {
        let t0 = Instant::now();
        let mut debouncer = Debouncer::new(INTERVAL);
        debouncer.try_begin(t0).unwrap();
        debouncer.settle();
        let _ = debouncer.try_begin(t0 + Duration::from_millis(1000));
        assert_eq!(debouncer.last_attempt, Some(t0));
    }
}
