//! Ordered-tier resolution that always produces an answer.
//!
//! Tiers run one at a time in ascending priority. A fetch error, timeout or
//! panic counts as a tier failure, as does output the tier's validator
//! rejects; the first acceptable output wins. A [`StaticTier`] is always
//! appended last and accepts its own payload, so [`FallbackCascade::resolve`]
//! cannot come back empty.
//!
//! The only way a resolution ends without a result is caller cancellation
//! through [`FallbackCascade::resolve_cancellable`].

use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use krishi_core::{
    Cancelled, CascadeResult, Payload, Query, SourceTag, TierAttempt, TierFailure, Unusable,
};

use crate::cache::ResponseCache;
use crate::config::RuntimeConfig;
use crate::executor::RequestExecutor;
use crate::resilience::{CircuitBreaker, CircuitBreakerConfig};
use crate::tiers::{GenerativeTier, LookupTier, StaticTier, Tier, TierError};

/// Resolves queries against an ordered list of tiers.
pub struct FallbackCascade {
    tiers: Vec<Arc<dyn Tier>>,
    last_resort: StaticTier,
    tier_timeout: Option<Duration>,
    breaker: Option<CircuitBreaker>,
    memo: Option<ResponseCache>,
}

/// Builder for [`FallbackCascade`].
#[derive(Default)]
pub struct CascadeBuilder {
    tiers: Vec<Arc<dyn Tier>>,
    last_resort: StaticTier,
    tier_timeout: Option<Duration>,
    breaker: Option<CircuitBreakerConfig>,
    memo: Option<ResponseCache>,
}

impl CascadeBuilder {
    /// Add a tier.
    pub fn tier(mut self, tier: impl Tier + 'static) -> Self {
        self.tiers.push(Arc::new(tier));
        self
    }

    /// Add a shared tier.
    pub fn shared_tier(mut self, tier: Arc<dyn Tier>) -> Self {
        self.tiers.push(tier);
        self
    }

    /// Replace the default `{"status": "unknown"}` last-resort tier.
    pub fn last_resort(mut self, tier: StaticTier) -> Self {
        self.last_resort = tier;
        self
    }

    /// Bound every tier's fetch.
    pub fn tier_timeout(mut self, timeout: Duration) -> Self {
        self.tier_timeout = Some(timeout);
        self
    }

    /// Skip tiers that keep failing.
    pub fn circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.breaker = Some(config);
        self
    }

    /// Remember acceptable `primary-ai` payloads by query key.
    pub fn memo(mut self, cache: ResponseCache) -> Self {
        self.memo = Some(cache);
        self
    }

    pub fn build(mut self) -> FallbackCascade {
        // Stable: equal priorities keep insertion order
        self.tiers.sort_by_key(|tier| tier.priority());

        FallbackCascade {
            tiers: self.tiers,
            last_resort: self.last_resort,
            tier_timeout: self.tier_timeout,
            breaker: self.breaker.map(CircuitBreaker::new),
            memo: self.memo,
        }
    }
}

impl FallbackCascade {
    pub fn builder() -> CascadeBuilder {
        CascadeBuilder::default()
    }

    /// Source tags in run order, last resort included.
    pub fn sources(&self) -> Vec<SourceTag> {
        self.tiers
            .iter()
            .map(|tier| tier.source())
            .chain(std::iter::once(self.last_resort.source()))
            .collect()
    }

    /// The per-tier circuit breaker, if enabled.
    pub fn breaker(&self) -> Option<&CircuitBreaker> {
        self.breaker.as_ref()
    }

    /// Resolve a query. Never fails.
    pub async fn resolve(&self, query: &Query) -> CascadeResult {
        let cancel = CancellationToken::new();
        match self.resolve_cancellable(query, &cancel).await {
            Ok(result) => result,
            // The token above is never cancelled
            Err(Cancelled) => self.last_resort_result(Vec::new()),
        }
    }

    /// Resolve a query, stopping as soon as `cancel` fires.
    pub async fn resolve_cancellable(
        &self,
        query: &Query,
        cancel: &CancellationToken,
    ) -> Result<CascadeResult, Cancelled> {
        let mut trail = Vec::new();

        for tier in &self.tiers {
            if cancel.is_cancelled() {
                return Err(Cancelled);
            }

            let source = tier.source();
            if let Some(breaker) = &self.breaker {
                if breaker.is_open(&source) {
                    tracing::debug!(tier = %source, "Circuit open, skipping tier");
                    trail.push(TierAttempt {
                        source,
                        failure: TierFailure::Skipped,
                    });
                    continue;
                }
            }

            let failure = match self.fetch(tier.as_ref(), query, cancel).await {
                Ok(raw) => match guarded_validate(tier.as_ref(), raw) {
                    Ok(Ok(payload)) => {
                        self.record(&source, true);
                        return Ok(self.accept(query, payload, source, trail).await);
                    }
                    Ok(Err(unusable)) => {
                        tracing::warn!(tier = %source, reason = %unusable.reason, "Tier output unusable");
                        TierFailure::Unusable(unusable.reason)
                    }
                    Err(message) => {
                        tracing::error!(tier = %source, panic = %message, "Validator panicked");
                        TierFailure::Failed(format!("validator panicked: {message}"))
                    }
                },
                Err(TierError::Cancelled(_)) if cancel.is_cancelled() => {
                    tracing::debug!(tier = %source, "Resolution cancelled");
                    return Err(Cancelled);
                }
                Err(TierError::NotFound) => {
                    // a miss says nothing about the tier's health
                    tracing::debug!(tier = %source, "No record for query");
                    trail.push(TierAttempt {
                        source,
                        failure: TierFailure::Failed(TierError::NotFound.to_string()),
                    });
                    continue;
                }
                Err(e) => {
                    tracing::warn!(tier = %source, error = %e, "Tier failed");
                    TierFailure::Failed(e.to_string())
                }
            };

            self.record(&source, false);
            trail.push(TierAttempt { source, failure });
        }

        if cancel.is_cancelled() {
            return Err(Cancelled);
        }
        Ok(self.last_resort_result(trail))
    }

    async fn fetch(
        &self,
        tier: &dyn Tier,
        query: &Query,
        cancel: &CancellationToken,
    ) -> Result<Payload, TierError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TierError::Cancelled(Cancelled)),
            result = guarded_fetch(tier, query, cancel, self.tier_timeout) => result,
        }
    }

    async fn accept(
        &self,
        query: &Query,
        payload: Payload,
        source: SourceTag,
        trail: Vec<TierAttempt>,
    ) -> CascadeResult {
        if source == SourceTag::PrimaryAi {
            if let Some(memo) = &self.memo {
                memo.insert(&query.key, payload.clone()).await;
            }
        }

        let result = CascadeResult::with_trail(payload, source, trail);
        if result.degraded() {
            tracing::info!(
                source = %result.source(),
                passed_over = result.trail().len(),
                "Resolved with degraded result"
            );
        } else {
            tracing::debug!(source = %result.source(), "Resolved");
        }
        result
    }

    fn last_resort_result(&self, trail: Vec<TierAttempt>) -> CascadeResult {
        tracing::info!(passed_over = trail.len(), "Every tier failed, returning static payload");
        CascadeResult::with_trail(self.last_resort.payload().clone(), SourceTag::Static, trail)
    }

    fn record(&self, source: &SourceTag, success: bool) {
        if let Some(breaker) = &self.breaker {
            if success {
                breaker.record_success(source);
            } else {
                breaker.record_failure(source);
            }
        }
    }
}

/// Run one fetch with panic isolation and the optional timeout.
async fn guarded_fetch(
    tier: &dyn Tier,
    query: &Query,
    cancel: &CancellationToken,
    timeout: Option<Duration>,
) -> Result<Payload, TierError> {
    let guarded = AssertUnwindSafe(tier.fetch(query, cancel)).catch_unwind();
    let caught = match timeout {
        Some(limit) => tokio::time::timeout(limit, guarded)
            .await
            .map_err(|_| TierError::Timeout(limit))?,
        None => guarded.await,
    };
    caught.unwrap_or_else(|panic| Err(TierError::Panicked(panic_message(panic.as_ref()))))
}

/// Run a tier's validator, returning the panic message if it unwinds.
fn guarded_validate(tier: &dyn Tier, raw: Payload) -> Result<Result<Payload, Unusable>, String> {
    std::panic::catch_unwind(AssertUnwindSafe(|| tier.validate(raw)))
        .map_err(|panic| panic_message(panic.as_ref()))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Assemble the standard cascade:
/// `primary-ai -> cache -> extra tiers -> secondary-ai -> static`.
///
/// `extra_tiers` keep their own priorities; the live external tier
/// (priority 20) lands between the cache and the secondary call.
pub fn standard_cascade(
    config: &RuntimeConfig,
    executor: Arc<RequestExecutor>,
    extra_tiers: Vec<Arc<dyn Tier>>,
) -> FallbackCascade {
    let memo = ResponseCache::from_config(&config.cascade.cache);

    let mut builder = FallbackCascade::builder()
        .tier(GenerativeTier::primary(executor.clone(), config.provider.model.clone()))
        .tier(LookupTier::cache(Arc::new(memo.clone())))
        .tier(GenerativeTier::secondary(
            executor,
            config.provider.secondary_model().to_string(),
        ))
        .last_resort(StaticTier::new(config.cascade.static_payload.clone()))
        .memo(memo);

    for tier in extra_tiers {
        builder = builder.shared_tier(tier);
    }
    if let Some(timeout) = config.cascade.tier_timeout {
        builder = builder.tier_timeout(timeout);
    }
    if let Some(breaker) = &config.cascade.circuit_breaker {
        builder = builder.circuit_breaker(breaker.clone());
    }
    builder.build()
}
