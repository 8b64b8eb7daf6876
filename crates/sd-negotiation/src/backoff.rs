//! Exponential reconnection backoff.

use std::time::Duration;

use crate::config::ReconnectConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    base: Duration,
    cap: Duration,
    max_attempts: u32,
}

impl ReconnectPolicy {
    pub fn new(config: &ReconnectConfig) -> Self {
        Self {
            base: Duration::from_millis(config.base_delay_ms),
            cap: Duration::from_millis(config.max_delay_ms),
            max_attempts: config.max_attempts,
        }
    }

    /// `min(base * 2^(attempt-1), cap)`, or `None` past the last attempt.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
        Some(self.base.saturating_mul(factor).min(self.cap))
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// A backoff chain is already waiting.
    AlreadyScheduled,
    Scheduled { attempt: u32, delay: Duration },
    Exhausted,
}

/// Re-entry guarded backoff chain: at most one reconnection is pending.
#[derive(Debug)]
pub struct ReconnectState {
    policy: ReconnectPolicy,
    attempts: u32,
    scheduled: bool,
}

impl ReconnectState {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self { policy, attempts: 0, scheduled: false }
    }

    pub fn schedule(&mut self) -> ReconnectDecision {
        if self.scheduled {
            return ReconnectDecision::AlreadyScheduled;
        }
        let attempt = self.attempts + 1;
        match self.policy.delay_for(attempt) {
            Some(delay) => {
                self.attempts = attempt;
                self.scheduled = true;
                ReconnectDecision::Scheduled { attempt, delay }
            }
            None => ReconnectDecision::Exhausted,
        }
    }

    /// The pending timer fired or was cancelled.
    pub fn fired(&mut self) {
        self.scheduled = false;
    }

    /// Connection recovered; the next failure starts from the base delay.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.scheduled = false;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_scheduled(&self) -> bool {
        self.scheduled
    }
}
