//! Reconnect backoff.
//!
//! - Delay before retry n (0-based) = baseline * 2^n, capped at the maximum
//! - Rate-limited failures wait at least the rate-limit floor
//! - The failure count resets only after a session stayed live long enough
//! - Optional jitter scales the actual sleep, never the recorded delay

use std::time::Duration;

use crate::config::ScraperConfig;

/// Maximum exponent to prevent overflow.
const MAX_EXPONENT: u32 = 31;

/// `min(baseline * 2^failures, cap)`.
pub fn next_delay(failures: u32, baseline: Duration, cap: Duration) -> Duration {
    let exponent = failures.min(MAX_EXPONENT);
    let multiplier = 2u32.saturating_pow(exponent);
    baseline.saturating_mul(multiplier).min(cap)
}

/// Scale `delay` by a random factor in `[1 - jitter, 1 + jitter]`.
pub fn apply_jitter(delay: Duration, jitter: f64) -> Duration {
    if jitter <= 0.0 || delay.is_zero() {
        return delay;
    }
    let factor = 1.0 - jitter + 2.0 * jitter * rand::random::<f64>();
    delay.mul_f64(factor.max(0.0))
}

/// Reconnect timing parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub baseline: Duration,
    pub cap: Duration,
    pub rate_limit_floor: Duration,
    pub stability: Duration,
    pub jitter: f64,
}

impl ReconnectPolicy {
    pub fn from_config(config: &ScraperConfig) -> Self {
        Self {
            baseline: config.reconnect_baseline(),
            cap: config.reconnect_max(),
            rate_limit_floor: config.rate_limit_floor(),
            stability: config.stability(),
            jitter: config.reconnect_jitter,
        }
    }

    pub fn delay_for(&self, failures: u32) -> Duration {
        next_delay(failures, self.baseline, self.cap)
    }
}

/// A scheduled wait before the next connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    /// Delay dictated by the policy (floor applied for rate limits)
    pub delay: Duration,
    /// Actual sleep after jitter
    pub sleep: Duration,
    /// Failures counted before this one
    pub failures: u32,
    pub rate_limited: bool,
}

/// Per-streamer reconnect bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectState {
    pub streamer: String,
    pub consecutive_failures: u32,
    pub next_delay: Duration,
}

impl ReconnectState {
    pub fn new(streamer: impl Into<String>, policy: &ReconnectPolicy) -> Self {
        Self {
            streamer: streamer.into(),
            consecutive_failures: 0,
            next_delay: policy.delay_for(0),
        }
    }

    /// Record a failure and return the wait before the next attempt.
    pub fn record_failure(&mut self, policy: &ReconnectPolicy, rate_limited: bool) -> Backoff {
        let failures = self.consecutive_failures;
        let delay = if rate_limited {
            self.next_delay.max(policy.rate_limit_floor)
        } else {
            self.next_delay
        };

        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.next_delay = policy.delay_for(self.consecutive_failures);

        Backoff {
            delay,
            sleep: apply_jitter(delay, policy.jitter),
            failures,
            rate_limited,
        }
    }

    /// Note how long the last session stayed live; resets the count when it was stable.
    ///
    /// Returns `true` if the state was reset.
    pub fn record_session(&mut self, policy: &ReconnectPolicy, live_for: Duration) -> bool {
        if live_for >= policy.stability {
            self.reset(policy);
            true
        } else {
            false
        }
    }

    pub fn reset(&mut self, policy: &ReconnectPolicy) {
        self.consecutive_failures = 0;
        self.next_delay = policy.delay_for(0);
    }
}
