// SPDX-License-Identifier: MIT OR Apache-2.0
//! Exponential backoff for reconnection and bounded retries.

use std::time::Duration;

/// Doubling backoff with a cap.
///
/// Reconnection uses the 1 s → 30 s profile; bounded external-call
/// retries use [`Backoff::external`].
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    attempt: u32,
}

impl Backoff {
    /// A backoff starting at `base` and doubling up to `cap`.
    #[must_use]
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            attempt: 0,
        }
    }

    /// The reconnection profile: 1 s doubling to a 30 s cap.
    #[must_use]
    pub fn reconnect() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30))
    }

    /// The external-call profile: 1 s doubling, capped well above the
    /// three attempts the bridge makes.
    #[must_use]
    pub fn external() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60))
    }

    /// The delay to sleep before the next attempt, advancing the
    /// internal counter.
    pub fn next_delay(&mut self) -> Duration {
        let exp = 2u64.saturating_pow(self.attempt);
        let delay_ms = (self.base.as_millis() as u64).saturating_mul(exp);
        self.attempt = self.attempt.saturating_add(1);
        Duration::from_millis(delay_ms.min(self.cap.as_millis() as u64))
    }

    /// Attempts made so far.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Start over after a success.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
