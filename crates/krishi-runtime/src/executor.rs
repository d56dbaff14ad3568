//! Retry and rotation loop over the credential pool.
//!
//! One [`RequestExecutor::execute`] performs a logical call:
//!
//! ```text
//! INIT -> SELECT_KEY -> CALLING -> SUCCESS
//!                          |-> RATE_LIMITED -> SELECT_KEY   (attempt unchanged)
//!                          `-> TRANSIENT    -> SELECT_KEY   (attempt += 1)
//! ```
//!
//! A round ends once the attempt counter reaches the pool size N, or once N
//! rate limits were hit in that round. Rounds are separated by the backoff
//! delay and capped by `max_retry_rounds` plus an optional wall-clock
//! deadline, so permanent rate limiting still terminates.
//!
//! When every credential has used its window quota, the executor waits for
//! the earliest window reset. That wait costs neither an attempt nor a round.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use krishi_core::{candidate_text, CredentialId, Selection};

use crate::config::RetryConfig;
use crate::pool::CredentialPool;
use crate::providers::{GenerateRequest, GenerativeTransport, ProviderError};
use crate::resilience::RoundBackoff;

/// Bounds on one logical call.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Rounds through the pool before giving up
    pub max_retry_rounds: u32,

    /// Bound on one transport call
    pub call_timeout: Duration,

    /// Delay schedule between rounds
    pub backoff: RoundBackoff,

    /// Optional wall-clock cap on the whole call
    pub deadline: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retry_rounds: config.max_retry_rounds,
            call_timeout: config.call_timeout,
            backoff: config.backoff.clone(),
            deadline: config.deadline,
        }
    }
}

/// Classified result of one call, or of a whole `execute`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// The endpoint answered with non-empty text
    Success(String),

    /// The endpoint signalled a rate limit
    RateLimited(String),

    /// Timeout, network error, non-2xx status, empty or malformed payload
    Transient(String),

    /// The caller cancelled
    Cancelled,
}

impl AttemptOutcome {
    /// Short name for logs and diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            AttemptOutcome::Success(_) => "success",
            AttemptOutcome::RateLimited(_) => "rate_limited",
            AttemptOutcome::Transient(_) => "transient",
            AttemptOutcome::Cancelled => "cancelled",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, AttemptOutcome::Success(_))
    }
}

/// One transport call made during an `execute`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptRecord {
    /// Round number, starting at 1
    pub round: u32,

    /// Attempt counter value when the call was made
    pub attempt: usize,

    /// Credential used
    pub credential: CredentialId,

    /// How the call ended
    pub outcome: AttemptOutcome,
}

/// Result of [`RequestExecutor::run`].
#[derive(Debug, Clone)]
pub struct Execution {
    /// Final outcome
    pub outcome: AttemptOutcome,

    /// Every call in order
    pub attempts: Vec<AttemptRecord>,

    /// Rounds started
    pub rounds: u32,
}

enum Pause {
    Elapsed,
    DeadlineReached,
    Cancelled,
}

/// Performs logical calls against the generative endpoint.
pub struct RequestExecutor {
    pool: Arc<CredentialPool>,
    transport: Arc<dyn GenerativeTransport>,
    policy: RetryPolicy,
}

impl RequestExecutor {
    pub fn new(
        pool: Arc<CredentialPool>,
        transport: Arc<dyn GenerativeTransport>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            pool,
            transport,
            policy,
        }
    }

    /// The shared pool.
    pub fn pool(&self) -> &Arc<CredentialPool> {
        &self.pool
    }

    /// The retry policy.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Perform one logical call, rotating credentials and retrying.
    ///
    /// Returns `Success`, `Transient` when retries are exhausted, or
    /// `Cancelled`. Never `RateLimited`.
    pub async fn execute(
        &self,
        request: &GenerateRequest,
        cancel: &CancellationToken,
    ) -> AttemptOutcome {
        self.run(request, cancel).await.outcome
    }

    /// Like [`execute`](Self::execute), also returning the attempt log.
    pub async fn run(&self, request: &GenerateRequest, cancel: &CancellationToken) -> Execution {
        let n = self.pool.len();
        let max_rounds = self.policy.max_retry_rounds.max(1);
        let mut delays = self.policy.backoff.delays(max_rounds);
        let deadline = self.policy.deadline.map(|d| Instant::now() + d);

        let mut attempts = Vec::new();
        let mut last_error = String::from("no call completed");
        let mut rounds = 0;

        let finish = |outcome, attempts, rounds| Execution {
            outcome,
            attempts,
            rounds,
        };

        'rounds: for round in 1..=max_rounds {
            rounds = round;
            let mut attempt = 0usize;
            let mut rate_limited = 0usize;

            while attempt < n && rate_limited < n {
                if deadline.is_some_and(|d| Instant::now() >= d) {
                    last_error = format!("deadline reached; last error: {last_error}");
                    break 'rounds;
                }

                let id = match self.pool.acquire() {
                    Selection::Ready(id) => id,
                    Selection::Saturated { retry_in } => {
                        tracing::debug!(
                            retry_in_ms = retry_in.as_millis() as u64,
                            "All credentials saturated, waiting for window reset"
                        );
                        match pause(retry_in, deadline, cancel).await {
                            Pause::Elapsed => continue,
                            Pause::DeadlineReached => {
                                last_error =
                                    format!("deadline reached while saturated; last error: {last_error}");
                                break 'rounds;
                            }
                            Pause::Cancelled => {
                                return finish(AttemptOutcome::Cancelled, attempts, rounds)
                            }
                        }
                    }
                };

                let outcome = self.call(id, request, deadline, cancel).await;
                tracing::debug!(
                    round,
                    attempt,
                    credential = id,
                    outcome = outcome.kind(),
                    transport = self.transport.name(),
                    "Attempt finished"
                );
                attempts.push(AttemptRecord {
                    round,
                    attempt,
                    credential: id,
                    outcome: outcome.clone(),
                });

                match outcome {
                    AttemptOutcome::Success(_) => {
                        self.pool.record_success(id);
                        return finish(outcome, attempts, rounds);
                    }
                    AttemptOutcome::RateLimited(cause) => {
                        tracing::warn!(credential = id, "Credential rate limited, rotating");
                        self.pool.record_failure(id, true);
                        rate_limited += 1;
                        last_error = cause;
                    }
                    AttemptOutcome::Transient(cause) => {
                        self.pool.record_failure(id, false);
                        attempt += 1;
                        last_error = cause;
                    }
                    AttemptOutcome::Cancelled => {
                        return finish(AttemptOutcome::Cancelled, attempts, rounds);
                    }
                }
            }

            if round < max_rounds {
                let delay = delays.next().unwrap_or(Duration::ZERO);
                tracing::debug!(round, delay_ms = delay.as_millis() as u64, "Round failed, backing off");
                match pause(delay, deadline, cancel).await {
                    Pause::Elapsed => {}
                    Pause::DeadlineReached => {
                        last_error = format!("deadline reached; last error: {last_error}");
                        break 'rounds;
                    }
                    Pause::Cancelled => return finish(AttemptOutcome::Cancelled, attempts, rounds),
                }
            }
        }

        tracing::warn!(rounds, attempts = attempts.len(), error = %last_error, "Retries exhausted");
        let outcome =
            AttemptOutcome::Transient(format!("exhausted after {rounds} rounds: {last_error}"));
        finish(outcome, attempts, rounds)
    }

    async fn call(
        &self,
        id: CredentialId,
        request: &GenerateRequest,
        deadline: Option<Instant>,
        cancel: &CancellationToken,
    ) -> AttemptOutcome {
        let Some(credential) = self.pool.credential(id) else {
            return AttemptOutcome::Transient(format!("unknown credential {id}"));
        };

        let budget = match deadline {
            Some(d) => self
                .policy
                .call_timeout
                .min(d.saturating_duration_since(Instant::now())),
            None => self.policy.call_timeout,
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => AttemptOutcome::Cancelled,
            result = tokio::time::timeout(budget, self.transport.generate(credential, request)) => {
                match result {
                    Err(_) => AttemptOutcome::Transient(ProviderError::Timeout(budget).to_string()),
                    Ok(Err(e)) if e.is_rate_limited() => AttemptOutcome::RateLimited(e.to_string()),
                    Ok(Err(e)) => AttemptOutcome::Transient(e.to_string()),
                    Ok(Ok(envelope)) => match candidate_text(&envelope) {
                        Some(text) => AttemptOutcome::Success(text),
                        None => AttemptOutcome::Transient("empty or malformed response".to_string()),
                    },
                }
            }
        }
    }
}

/// Sleep for `delay`, cut short by the deadline or the caller.
async fn pause(delay: Duration, deadline: Option<Instant>, cancel: &CancellationToken) -> Pause {
    let wake = Instant::now() + delay;
    let (until, hits_deadline) = match deadline {
        Some(d) if d <= wake => (d, true),
        _ => (wake, false),
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Pause::Cancelled,
        _ = tokio::time::sleep_until(until) => {
            if hits_deadline {
                Pause::DeadlineReached
            } else {
                Pause::Elapsed
            }
        }
    }
}
