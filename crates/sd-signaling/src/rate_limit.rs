//! Per-source throttle for viewer authentication attempts.
//!
//! Fixed window counter keyed by source address. A window opens on the
//! first recorded attempt and lasts `window_secs`; a source with
//! `max_attempts` recorded inside a live window is blocked until the
//! window expires. Only authentication is throttled, never live sessions.
//!
//! Callers charge an attempt before verifying it and [`release`] it when the
//! credentials turn out to be valid, so attempts still in flight count.
//!
//! [`release`]: AuthRateLimiter::release

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub max_attempts: u32,
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            window_secs: 60,
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

#[derive(Debug, Clone, Copy)]
struct AttemptWindow {
    count: u32,
    window_start: Instant,
}

impl AttemptWindow {
    fn expired(&self, now: Instant, window: Duration) -> bool {
        now.saturating_duration_since(self.window_start) > window
    }
}

/// Authentication attempt limiter.
///
/// Time is passed in by the caller so the owner can drive it from its own
/// clock.
#[derive(Debug)]
pub struct AuthRateLimiter {
    config: RateLimitConfig,
    windows: HashMap<String, AttemptWindow>,
}

impl AuthRateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: HashMap::new(),
        }
    }

    /// Record one attempt from `key`, returning the count in the live window.
    pub fn record_attempt(&mut self, key: &str, now: Instant) -> u32 {
        let window = self.config.window();
        let entry = self
            .windows
            .entry(key.to_string())
            .or_insert(AttemptWindow { count: 0, window_start: now });

        if entry.expired(now, window) {
            *entry = AttemptWindow { count: 0, window_start: now };
        }
        entry.count += 1;

        if entry.count == self.config.max_attempts {
            warn!(
                source = %key,
                attempts = entry.count,
                window_secs = self.config.window_secs,
                "Authentication attempts exhausted, source blocked"
            );
        }
        entry.count
    }

    /// Return one attempt recorded by [`record_attempt`](Self::record_attempt)
    /// once it turned out to be a success.
    pub fn release(&mut self, key: &str, now: Instant) {
        let window = self.config.window();
        if let Some(entry) = self.windows.get_mut(key) {
            if !entry.expired(now, window) {
                entry.count = entry.count.saturating_sub(1);
            }
        }
    }

    /// True iff a live window for `key` has reached `max_attempts`.
    /// Expired windows are dropped here.
    pub fn is_blocked(&mut self, key: &str, now: Instant) -> bool {
        let window = self.config.window();
        match self.windows.get(key) {
            Some(entry) if entry.expired(now, window) => {
                self.windows.remove(key);
                false
            }
            Some(entry) => entry.count >= self.config.max_attempts,
            None => false,
        }
    }

    /// Drop every expired window. Returns how many were removed.
    pub fn cleanup(&mut self, now: Instant) -> usize {
        let window = self.config.window();
        let before = self.windows.len();
        self.windows.retain(|_, entry| !entry.expired(now, window));
        before - self.windows.len()
    }

    pub fn tracked_sources(&self) -> usize {
        self.windows.len()
    }
}
