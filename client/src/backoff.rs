//! Reconnect delay policy.

use std::time::Duration;

use rand::Rng;

/// How long to wait between reconnect attempts.
///
/// Delays double per consecutive failure, capped at `cap`, with up to
/// `jitter` of random extra delay so a fleet of clients does not stampede
/// a recovering hub. `max_attempts` bounds consecutive failures before the
/// client gives up; a successful session resets the count.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub jitter: Duration,
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            cap: Duration::from_secs(30),
            jitter: Duration::from_millis(250),
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    /// The deterministic delay before attempt `attempt` (1-based), without
    /// jitter. Attempt 1 waits `base`, each further attempt doubles, capped.
    #[must_use]
    pub fn raw_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base.saturating_mul(2u32.saturating_pow(exponent)).min(self.cap)
    }

    /// The jittered delay before attempt `attempt`.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let jitter_ms = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
        };
        self.raw_delay(attempt).saturating_add(jitter)
    }

    /// Whether `attempts` consecutive failures exhaust the policy.
    #[must_use]
    pub fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }
}

#[cfg(test)]
#[path = "backoff_test.rs"]
mod tests;
