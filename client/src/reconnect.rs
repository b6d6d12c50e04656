//! Connection lifecycle state machine.
//!
//! DESIGN
//! ======
//! The session loop is easier to reason about when the reconnect decisions
//! live in a pure state machine: `dial` before each attempt, `established`
//! once the hub confirms admission, `lost` when the session ends. `lost`
//! answers with exactly one action, and `GiveUp` is emitted at most once
//! per exhaustion so the loop cannot double-report it.

use std::time::Duration;

use crate::backoff::ReconnectPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Disconnected,
    Connecting,
    Connected,
}

/// What the session loop should do after a session ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Sleep this long, then dial again.
    Backoff(Duration),
    /// The policy is exhausted; stop for good.
    GiveUp,
    /// Already gave up earlier; nothing to do.
    Idle,
}

#[derive(Debug)]
pub struct Controller {
    policy: ReconnectPolicy,
    phase: Phase,
    /// Consecutive failed attempts since the last established session.
    attempts: u32,
    gave_up: bool,
}

impl Controller {
    #[must_use]
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self { policy, phase: Phase::Disconnected, attempts: 0, gave_up: false }
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Record the start of a connection attempt.
    pub fn dial(&mut self) {
        self.phase = Phase::Connecting;
        self.attempts = self.attempts.saturating_add(1);
    }

    /// Record a confirmed admission. Resets the failure count so the next
    /// disconnect backs off from the base delay again.
    pub fn established(&mut self) {
        self.phase = Phase::Connected;
        self.attempts = 0;
    }

    /// Record the end of a session (failed dial or dropped connection) and
    /// decide what happens next.
    pub fn lost(&mut self) -> Action {
        self.phase = Phase::Disconnected;
        if self.gave_up {
            return Action::Idle;
        }
        if self.policy.exhausted(self.attempts) {
            self.gave_up = true;
            return Action::GiveUp;
        }
        // attempts already counts the dial that just failed, so the next
        // attempt is attempts + 1.
        Action::Backoff(self.policy.delay(self.attempts.saturating_add(1)))
    }
}

#[cfg(test)]
#[path = "reconnect_test.rs"]
mod tests;
