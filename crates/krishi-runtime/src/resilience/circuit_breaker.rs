//! Circuit breaker to stop calling tiers that keep failing.
//!
//! When a tier fails repeatedly, its circuit opens and the cascade skips it
//! until `recovery_timeout` has passed. Circuits are keyed by source tag.

use krishi_core::SourceTag;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::humantime_duration;

/// Circuit breaker configuration.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening circuit
    pub failure_threshold: u32,

    /// Time before attempting recovery
    #[serde(with = "humantime_duration")]
    pub recovery_timeout: Duration,

    /// Successes needed to close circuit
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(30),
            success_threshold: 2,
        }
    }
}

/// State of a circuit.
#[derive(Debug, Clone, PartialEq)]
pub enum CircuitState {
    /// Normal operation
    Closed { failures: u32 },

    /// Circuit is open, the tier is skipped
    Open { opened_at: Instant },

    /// Letting trial calls through
    HalfOpen { successes: u32 },
}

/// Per-tier circuit breaker.
///
/// Each source tag has its own circuit so tiers recover independently.
pub struct CircuitBreaker {
    states: RwLock<HashMap<SourceTag, CircuitState>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    /// Create a new circuit breaker.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Check if the circuit for `source` is open.
    ///
    /// An open circuit whose recovery timeout has passed moves to half-open
    /// and lets the call through.
    pub fn is_open(&self, source: &SourceTag) -> bool {
        let states = self.states.read();
        match states.get(source) {
            Some(CircuitState::Open { opened_at }) => {
                if opened_at.elapsed() >= self.config.recovery_timeout {
                    drop(states);
                    self.transition_to_half_open(source);
                    false
                } else {
                    true
                }
            }
            _ => false,
        }
    }

    /// Record an acceptable result from `source`.
    pub fn record_success(&self, source: &SourceTag) {
        let mut states = self.states.write();
        match states.get(source).cloned() {
            Some(CircuitState::HalfOpen { successes }) => {
                if successes + 1 >= self.config.success_threshold {
                    states.insert(source.clone(), CircuitState::Closed { failures: 0 });
                    tracing::info!(tier = %source, "Circuit closed after successful recovery");
                } else {
                    states.insert(
                        source.clone(),
                        CircuitState::HalfOpen {
                            successes: successes + 1,
                        },
                    );
                }
            }
            Some(CircuitState::Closed { failures }) if failures > 0 => {
                states.insert(source.clone(), CircuitState::Closed { failures: 0 });
            }
            _ => {}
        }
    }

    /// Record a failed or unusable result from `source`.
    pub fn record_failure(&self, source: &SourceTag) {
        let mut states = self.states.write();
        let failures = match states.get(source) {
            Some(CircuitState::Closed { failures }) => *failures,
            None => 0,
            Some(CircuitState::HalfOpen { .. }) => {
                states.insert(
                    source.clone(),
                    CircuitState::Open {
                        opened_at: Instant::now(),
                    },
                );
                tracing::warn!(tier = %source, "Circuit reopened after failed recovery attempt");
                return;
            }
            Some(CircuitState::Open { .. }) => return,
        };

        if failures + 1 >= self.config.failure_threshold {
            states.insert(
                source.clone(),
                CircuitState::Open {
                    opened_at: Instant::now(),
                },
            );
            tracing::warn!(
                tier = %source,
                failures = failures + 1,
                "Circuit opened after repeated failures"
            );
        } else {
            states.insert(
                source.clone(),
                CircuitState::Closed {
                    failures: failures + 1,
                },
            );
        }
    }

    fn transition_to_half_open(&self, source: &SourceTag) {
        let mut states = self.states.write();
        if matches!(states.get(source), Some(CircuitState::Open { .. })) {
            states.insert(source.clone(), CircuitState::HalfOpen { successes: 0 });
            tracing::info!(tier = %source, "Circuit half-open, allowing a trial call");
        }
    }

    /// Get current state of a circuit.
    pub fn state(&self, source: &SourceTag) -> CircuitState {
        self.states
            .read()
            .get(source)
            .cloned()
            .unwrap_or(CircuitState::Closed { failures: 0 })
    }

    /// Reset all circuits to closed.
    pub fn reset(&self) {
        self.states.write().clear();
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
