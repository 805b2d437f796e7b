//! Exponential backoff policy for connection attempts.

use std::time::Duration;

/// Pure retry/backoff decision function. Owns no clock and performs no I/O;
/// the session worker asks it how long to wait after each failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    base: Duration,
    max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy {
            base: Duration::from_secs(1),
            max_attempts: 3,
        }
    }
}

impl ReconnectPolicy {
    pub fn new(base: Duration, max_attempts: u32) -> Self {
        ReconnectPolicy { base, max_attempts }
    }

    /// Total number of connection attempts allowed per connect request.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay to wait after the given failed attempt (1-based) before trying
    /// again: `base * 2^(attempt-1)`. Returns `None` once every attempt has
    /// been used, which callers must surface as permanent failure.
    pub fn delay_after(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        let exponent = attempt.saturating_sub(1).min(16);
        Some(self.base * 2u32.pow(exponent))
    }
}
