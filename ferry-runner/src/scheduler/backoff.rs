//! Failure backoff
//!
//! Without a delay a server that fails fast would be polled in a tight loop.
//! After each consecutive failed cycle the delay doubles, capped at `max`.

use std::time::Duration;

use crate::config::PollConfig;

/// Upper bound on the doubling exponent
const MAX_SHIFT: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { initial, max }
    }

    /// Delay before the next cycle after `failures` consecutive failures
    pub fn delay(&self, failures: u32) -> Duration {
        if failures == 0 || self.initial.is_zero() {
            return Duration::ZERO;
        }
        let shift = (failures - 1).min(MAX_SHIFT);
        self.initial.saturating_mul(1 << shift).min(self.max)
    }
}

impl From<PollConfig> for Backoff {
    fn from(config: PollConfig) -> Self {
        Self::new(config.backoff_initial, config.backoff_max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_doubles_up_to_max() {
        let backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(10));

        assert_eq!(backoff.delay(0), Duration::ZERO);
        assert_eq!(backoff.delay(1), Duration::from_secs(1));
        assert_eq!(backoff.delay(2), Duration::from_secs(2));
        assert_eq!(backoff.delay(4), Duration::from_secs(8));
        assert_eq!(backoff.delay(5), Duration::from_secs(10));
        assert_eq!(backoff.delay(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn test_disabled() {
        let backoff = Backoff::new(Duration::ZERO, Duration::from_secs(60));
        assert_eq!(backoff.delay(1), Duration::ZERO);
        assert_eq!(backoff.delay(100), Duration::ZERO);
    }

    #[test]
    fn test_from_poll_config() {
        let backoff = Backoff::from(PollConfig {
            backoff_initial: Duration::from_millis(500),
            backoff_max: Duration::from_secs(30),
        });
        assert_eq!(backoff.delay(2), Duration::from_secs(1));
    }
}
