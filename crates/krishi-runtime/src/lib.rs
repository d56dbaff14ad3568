//! # krishi-runtime
//!
//! Async scheduling of a scarce, rate-limited generative endpoint behind a
//! fallback cascade that always answers.
//!
//! - [`CredentialPool`] shares N rate-limited credentials between all
//!   requests of a deployment
//! - [`RequestExecutor`] rotates credentials: rate limits re-select at no
//!   cost, other failures spend attempts, rounds are bounded
//! - [`FallbackCascade`] walks ordered tiers and returns the first usable
//!   payload, or a static one
//!
//! ## Example
//!
//! ```rust,ignore
//! use krishi_core::Query;
//! use krishi_runtime::{gemini_cascade, RuntimeConfig};
//!
//! let config = RuntimeConfig::from_yaml_file("krishi.yaml")?;
//! let cascade = gemini_cascade(&config, Vec::new())?;
//!
//! let result = cascade.resolve(&Query::text("Price of onion in Nashik?")).await;
//! if result.degraded() {
//!     // show a best-effort indicator
//! }
//! ```

use std::sync::Arc;
use thiserror::Error;

pub mod cache;
pub mod cascade;
pub mod config;
pub mod executor;
pub mod pool;
pub mod providers;
pub mod resilience;
pub mod tiers;

pub use cache::ResponseCache;
pub use cascade::{standard_cascade, CascadeBuilder, FallbackCascade};
pub use config::{
    CacheConfig, CascadeConfig, ConfigError, PoolConfig, ProviderConfig, RetryConfig,
    RuntimeConfig,
};
pub use executor::{AttemptOutcome, AttemptRecord, Execution, RequestExecutor, RetryPolicy};
pub use pool::{Clock, CredentialPool, PoolError, TokioClock};
pub use providers::{
    ApiCredential, GeminiTransport, GenerateRequest, GenerativeTransport, ProviderError,
};
pub use resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitState, RoundBackoff};
pub use tiers::{
    GenerativeTier, LookupTier, PromptBuilder, QueryPrompt, RecordSource, SimplifiedPrompt,
    StaticTier, Tier, TierError,
};

/// Errors from assembling the runtime.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Pool(#[from] PoolError),
}

/// Build the shared pool and executor for a transport.
pub fn build_executor(
    config: &RuntimeConfig,
    credentials: Vec<ApiCredential>,
    transport: Arc<dyn GenerativeTransport>,
) -> Result<Arc<RequestExecutor>, RuntimeError> {
    config.validate()?;
    let pool = Arc::new(CredentialPool::new(credentials, &config.pool)?);
    Ok(Arc::new(RequestExecutor::new(
        pool,
        transport,
        RetryPolicy::from(&config.retry),
    )))
}

/// Assemble the standard cascade against the Gemini endpoint.
///
/// Credentials load from the configuration or the environment.
pub fn gemini_cascade(
    config: &RuntimeConfig,
    extra_tiers: Vec<Arc<dyn Tier>>,
) -> Result<FallbackCascade, RuntimeError> {
    let credentials = providers::load_api_keys(&config.provider)?;
    let transport =
        GeminiTransport::from_config(&config.provider)?.with_timeout(config.retry.call_timeout);

    tracing::info!(
        credentials = credentials.len(),
        model = %config.provider.model,
        "Assembling Gemini cascade"
    );

    let executor = build_executor(config, credentials, Arc::new(transport))?;
    Ok(standard_cascade(config, executor, extra_tiers))
}
