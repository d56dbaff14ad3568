//! Shared credential pool.
//!
//! One pool is created per deployment and handed to every executor that
//! needs it as an `Arc<CredentialPool>`. Usage records live behind a single
//! mutex: selection and dispatch accounting happen under the same lock, so
//! concurrent requests cannot push a credential past its window quota.
//! The lock is never held across an await.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

use krishi_core::{CredentialId, KeySelector, Selection, SelectorConfig, UsageRecord};

use crate::config::PoolConfig;
use crate::providers::ApiCredential;

/// Errors from pool construction.
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("credential pool needs at least one credential")]
    Empty,
}

/// Source of the current instant for window and cooldown arithmetic.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Clock backed by tokio's time driver, so paused test time applies.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }
}

/// A fixed set of interchangeable, independently rate-limited credentials.
pub struct CredentialPool {
    credentials: Vec<ApiCredential>,
    usage: Mutex<Vec<UsageRecord>>,
    selector: KeySelector,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for CredentialPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialPool")
            .field("size", &self.credentials.len())
            .field("selector", &self.selector)
            .finish()
    }
}

impl CredentialPool {
    /// Create a pool over `credentials`.
    pub fn new(credentials: Vec<ApiCredential>, config: &PoolConfig) -> Result<Self, PoolError> {
        Self::with_clock(credentials, SelectorConfig::from(config), Arc::new(TokioClock))
    }

    /// Create a pool with explicit scoring constants and clock.
    pub fn with_clock(
        credentials: Vec<ApiCredential>,
        selector: SelectorConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, PoolError> {
        if credentials.is_empty() {
            return Err(PoolError::Empty);
        }

        let now = clock.now();
        let usage = (0..credentials.len())
            .map(|id| UsageRecord::new(id, now))
            .collect();

        tracing::debug!(size = credentials.len(), "Credential pool created");

        Ok(Self {
            credentials,
            usage: Mutex::new(usage),
            selector: KeySelector::new(selector),
            clock,
        })
    }

    /// Number of credentials.
    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    /// Always false: empty pools cannot be constructed.
    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    /// Scoring constants in use.
    pub fn selector_config(&self) -> &SelectorConfig {
        self.selector.config()
    }

    /// Pick the best credential without counting a request against it.
    pub fn select_credential(&self) -> Selection {
        let now = self.clock.now();
        let mut usage = self.usage.lock();
        self.roll_windows(&mut usage, now);
        self.selector.select(&usage, now)
    }

    /// Pick the best credential and count one dispatched request against it.
    pub fn acquire(&self) -> Selection {
        let now = self.clock.now();
        let mut usage = self.usage.lock();
        self.roll_windows(&mut usage, now);

        let selection = self.selector.select(&usage, now);
        if let Selection::Ready(id) = selection {
            usage[id].record_request();
        }
        selection
    }

    /// The credential with the given id.
    pub fn credential(&self, id: CredentialId) -> Option<&ApiCredential> {
        self.credentials.get(id)
    }

    /// Record a successful call on `id`.
    pub fn record_success(&self, id: CredentialId) {
        match self.usage.lock().get_mut(id) {
            Some(record) => record.record_success(),
            None => tracing::warn!(credential = id, "Success recorded for unknown credential"),
        }
    }

    /// Record a failed call on `id`.
    pub fn record_failure(&self, id: CredentialId, rate_limited: bool) {
        let now = self.clock.now();
        match self.usage.lock().get_mut(id) {
            Some(record) => record.record_failure(now, rate_limited),
            None => tracing::warn!(credential = id, "Failure recorded for unknown credential"),
        }
    }

    /// Copy of every usage record, windows rolled to now.
    pub fn snapshot(&self) -> Vec<UsageRecord> {
        let now = self.clock.now();
        let mut usage = self.usage.lock();
        self.roll_windows(&mut usage, now);
        usage.clone()
    }

    fn roll_windows(&self, usage: &mut [UsageRecord], now: Instant) {
        let window = self.selector.config().window;
        for record in usage.iter_mut() {
            if record.roll_window(now, window) {
                tracing::trace!(credential = record.id, "Rate-limit window reset");
            }
        }
    }
}
