//! # Exponential Backoff
//!
//! Provides an exponential backoff with full jitter for retries.
//!
//! The ceiling doubles with every consecutive failure, starting at the base
//! delay and capped at the maximum. The delay actually used is drawn
//! uniformly from `[0, ceiling]` so that workers failing together do not
//! retry together.
//!
//! ## Usage
//!
//! ```rust
//! use std::time::Duration;
//! use vault_secrets_controller::controller::backoff::ExponentialBackoff;
//!
//! let mut backoff = ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(60));
//! assert_eq!(backoff.ceiling(), Duration::from_secs(1));
//! let delay = backoff.next_backoff();
//! assert!(delay <= Duration::from_secs(1));
//! assert_eq!(backoff.ceiling(), Duration::from_secs(2));
//! ```

use rand::Rng;
use std::time::Duration;

/// Exponential backoff calculator with full jitter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExponentialBackoff {
    /// Ceiling of the first delay
    base: Duration,
    /// Upper bound for every ceiling
    max: Duration,
    /// Consecutive failures seen since the last reset
    attempt: u32,
}

impl ExponentialBackoff {
    /// Create a new backoff with the given base delay and maximum delay
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            attempt: 0,
        }
    }

    /// Ceiling of the next delay: `min(max, base * 2^attempt)`
    #[must_use]
    pub fn ceiling(&self) -> Duration {
        let factor = 2u32.checked_pow(self.attempt).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .map_or(self.max, |ceiling| ceiling.min(self.max))
    }

    /// Number of delays handed out since the last reset
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Get the next jittered delay and advance the sequence
    pub fn next_backoff(&mut self) -> Duration {
        self.next_backoff_with(&mut rand::thread_rng())
    }

    /// Same as [`next_backoff`](Self::next_backoff) with a caller-supplied RNG
    pub fn next_backoff_with<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Duration {
        let ceiling = self.ceiling();
        self.attempt = self.attempt.saturating_add(1);
        let ceiling_ms = u64::try_from(ceiling.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(rng.gen_range(0..=ceiling_ms))
    }

    /// Reset the backoff to the initial state
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
