//! Resilience patterns for the cascade and the executor.
//!
//! This module provides:
//! - A per-tier circuit breaker that skips tiers which keep failing
//! - The delay schedule applied between retry rounds

mod backoff;
mod circuit_breaker;

pub use backoff::RoundBackoff;
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
