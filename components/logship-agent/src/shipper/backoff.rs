//! Reconnection delay policy.
//!
//! Delays start at the lower bound, double per failed attempt and are capped at
//! the upper bound. A jitter factor spreads retries from a fleet of agents that
//! lost the same server at the same time. The final delay is always clamped
//! back into `[min, max]`, so equal bounds give a fixed delay.

// External crates
use rand::Rng;
use std::time::Duration;

const JITTER: f64 = 0.2;
const MAX_DOUBLINGS: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffBounds {
    pub min: Duration,
    pub max: Duration,
}

impl BackoffBounds {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self { min, max: max.max(min) }
    }

    /// Both bounds pinned to the same delay.
    pub fn fixed(delay: Duration) -> Self {
        Self { min: delay, max: delay }
    }
}

#[derive(Debug, Clone)]
pub struct Backoff {
    bounds: BackoffBounds,
    attempts: u32,
}

impl Backoff {
    pub fn new(bounds: BackoffBounds) -> Self {
        Self { bounds, attempts: 0 }
    }

    pub fn bounds(&self) -> BackoffBounds {
        self.bounds
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Swap the bounds without forgetting the attempt count.
    pub fn set_bounds(&mut self, bounds: BackoffBounds) {
        self.bounds = bounds;
    }

    /// Delay before the next attempt; counts the attempt.
    pub fn next_delay(&mut self) -> Duration {
        let doublings = self.attempts.min(MAX_DOUBLINGS);
        self.attempts = self.attempts.saturating_add(1);

        let base = self
            .bounds
            .min
            .saturating_mul(1u32 << doublings)
            .min(self.bounds.max);
        let jitter_factor: f64 = rand::rng().random_range(1.0 - JITTER..1.0 + JITTER);

        base.mul_f64(jitter_factor)
            .clamp(self.bounds.min, self.bounds.max)
    }

    /// Forget failed attempts and return to `bounds`.
    pub fn reset(&mut self, bounds: BackoffBounds) {
        self.bounds = bounds;
        self.attempts = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn short() -> BackoffBounds {
        BackoffBounds::new(Duration::from_secs(1), Duration::from_secs(5))
    }

    #[test]
    fn delays_stay_within_bounds_and_grow() {
        let mut backoff = Backoff::new(short());

        let delays: Vec<Duration> = (0..10).map(|_| backoff.next_delay()).collect();

        for delay in &delays {
            assert!(*delay >= Duration::from_secs(1) && *delay <= Duration::from_secs(5));
        }
        assert!(delays[0] <= Duration::from_millis(1200));
        assert!(delays[9] >= Duration::from_secs(4));
        assert_eq!(backoff.attempts(), 10);
    }

    #[test]
    fn fixed_bounds_give_a_fixed_delay() {
        let hour = Duration::from_secs(3600);
        let mut backoff = Backoff::new(BackoffBounds::fixed(hour));

        assert_eq!(backoff.next_delay(), hour);
        assert_eq!(backoff.next_delay(), hour);
    }

    #[test]
    fn reset_restarts_from_the_lower_bound() {
        let mut backoff = Backoff::new(BackoffBounds::fixed(Duration::from_secs(3600)));
        backoff.next_delay();

        backoff.reset(short());

        assert_eq!(backoff.attempts(), 0);
        assert_eq!(backoff.bounds(), short());
        assert!(backoff.next_delay() <= Duration::from_millis(1200));
    }

    #[test]
    fn inverted_bounds_are_normalised() {
        let bounds = BackoffBounds::new(Duration::from_secs(5), Duration::from_secs(1));
        assert_eq!(bounds.max, Duration::from_secs(5));
    }
}
