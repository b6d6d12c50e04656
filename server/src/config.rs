//! Hub configuration.
//!
//! DESIGN
//! ======
//! All timing contracts live here (liveness window, heartbeat interval,
//! ping timeout) and are read from environment variables with typed
//! defaults. Nothing downstream hardcodes a duration. Parsing goes through
//! a lookup closure so tests can feed values without touching process env.

use std::time::Duration;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_LIVENESS_WINDOW_MS: u64 = 30_000;
const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 10_000;
const DEFAULT_PING_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Runtime configuration for the hub.
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP port the hub listens on.
    pub port: u16,
    /// Maximum presence silence before an entry is expired.
    pub liveness_window_ms: u64,
    /// Interval between heartbeat/expiry sweeps.
    pub heartbeat_interval_ms: u64,
    /// Maximum silence on a connection before it is evicted.
    pub ping_timeout_ms: u64,
    /// How long a fresh socket may wait before sending `connect`.
    pub connect_timeout_ms: u64,
    /// Bounded capacity of each connection's outbound event queue.
    pub outbound_queue_capacity: usize,
    /// Base URL of the external identity service. When unset the hub
    /// falls back to development tokens (`<user-uuid>:<workspace>`).
    pub auth_url: Option<String>,
}

impl Config {
    /// Load configuration from process environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            port: parse(&lookup, "PORT", DEFAULT_PORT),
            liveness_window_ms: parse(&lookup, "LIVENESS_WINDOW_MS", DEFAULT_LIVENESS_WINDOW_MS),
            heartbeat_interval_ms: parse(&lookup, "HEARTBEAT_INTERVAL_MS", DEFAULT_HEARTBEAT_INTERVAL_MS),
            ping_timeout_ms: parse(&lookup, "PING_TIMEOUT_MS", DEFAULT_PING_TIMEOUT_MS),
            connect_timeout_ms: parse(&lookup, "CONNECT_TIMEOUT_MS", DEFAULT_CONNECT_TIMEOUT_MS),
            outbound_queue_capacity: parse(&lookup, "OUTBOUND_QUEUE_CAPACITY", DEFAULT_OUTBOUND_QUEUE_CAPACITY),
            auth_url: lookup("AUTH_URL").filter(|v| !v.is_empty()),
        }
    }

    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    lookup(key).and_then(|v| v.parse::<T>().ok()).unwrap_or(default)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
