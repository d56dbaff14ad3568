//! Per-credential usage accounting.
//!
//! A [`UsageRecord`] tracks one credential's request count in its current
//! rate-limit window together with its error history. Windows reset lazily:
//! nothing runs on a timer, the record is rolled forward whenever it is
//! inspected after the window has elapsed.

use std::time::{Duration, Instant};

/// Stable index of a credential within its pool.
pub type CredentialId = usize;

/// Mutable usage state of one credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageRecord {
    /// Position of the credential in its pool
    pub id: CredentialId,

    /// Requests dispatched in the current window
    pub requests_in_window: u32,

    /// Start of the current window
    pub window_start: Instant,

    /// Lifetime error count (rate limits included)
    pub error_count: u64,

    /// Lifetime rate-limit count
    pub rate_limited_count: u64,

    /// Lifetime success count
    pub success_count: u64,

    /// When the credential last failed
    pub last_error_at: Option<Instant>,
}

impl UsageRecord {
    /// Fresh record whose first window starts at `now`.
    pub fn new(id: CredentialId, now: Instant) -> Self {
        Self {
            id,
            requests_in_window: 0,
            window_start: now,
            error_count: 0,
            rate_limited_count: 0,
            success_count: 0,
            last_error_at: None,
        }
    }

    /// Whether the current window has elapsed at `now`.
    pub fn window_expired(&self, now: Instant, window: Duration) -> bool {
        now.saturating_duration_since(self.window_start) > window
    }

    /// Reset the window if it has elapsed. Returns true if a reset happened.
    pub fn roll_window(&mut self, now: Instant, window: Duration) -> bool {
        if self.window_expired(now, window) {
            self.requests_in_window = 0;
            self.window_start = now;
            true
        } else {
            false
        }
    }

    /// Requests counted against the window as seen at `now`.
    pub fn effective_requests(&self, now: Instant, window: Duration) -> u32 {
        if self.window_expired(now, window) {
            0
        } else {
            self.requests_in_window
        }
    }

    /// Time until the current window can be reset.
    pub fn time_until_reset(&self, now: Instant, window: Duration) -> Duration {
        let elapsed = now.saturating_duration_since(self.window_start);
        // Reset requires strictly more than `window` to have passed.
        window.saturating_sub(elapsed) + Duration::from_millis(1)
    }

    /// Whether the credential has been error-free for longer than `cooldown`.
    pub fn is_healthy(&self, now: Instant, cooldown: Duration) -> bool {
        match self.last_error_at {
            None => true,
            Some(at) => now.saturating_duration_since(at) > cooldown,
        }
    }

    /// Count one dispatched request.
    pub fn record_request(&mut self) {
        self.requests_in_window = self.requests_in_window.saturating_add(1);
    }

    /// Count one successful call.
    pub fn record_success(&mut self) {
        self.success_count = self.success_count.saturating_add(1);
    }

    /// Count one failed call at `now`.
    pub fn record_failure(&mut self, now: Instant, rate_limited: bool) {
        self.error_count = self.error_count.saturating_add(1);
        if rate_limited {
            self.rate_limited_count = self.rate_limited_count.saturating_add(1);
        }
        self.last_error_at = Some(now);
    }
}
