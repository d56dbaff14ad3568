//! Data-source tiers for the fallback cascade.
//!
//! A tier fetches a raw payload for a query and judges whether that payload
//! is usable. Tiers are ordered by ascending priority; the cascade appends a
//! [`StaticTier`] after all of them.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use krishi_core::{Cancelled, NonEmpty, Payload, Query, ResponseValidator, SourceTag, Unusable};

mod fixed;
mod generative;
mod lookup;

pub use fixed::StaticTier;
pub use generative::{GenerativeTier, PromptBuilder, QueryPrompt, SimplifiedPrompt};
pub use lookup::{LookupTier, RecordSource};

/// Default priorities, cheapest and most authoritative first.
pub mod priority {
    pub const PRIMARY_AI: i32 = 0;
    pub const CACHE: i32 = 10;
    pub const LIVE_EXTERNAL: i32 = 20;
    pub const SECONDARY_AI: i32 = 30;
    pub const STATIC: i32 = i32::MAX;
}

/// Why a tier's fetch produced nothing.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TierError {
    #[error("retries exhausted: {0}")]
    Exhausted(String),

    #[error("source unavailable: {0}")]
    Unavailable(String),

    #[error("no record for query")]
    NotFound,

    #[error("tier timed out after {0:?}")]
    Timeout(Duration),

    #[error("tier panicked: {0}")]
    Panicked(String),

    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

/// One alternative data source.
#[async_trait]
pub trait Tier: Send + Sync {
    /// Provenance tag reported on results from this tier.
    fn source(&self) -> SourceTag;

    /// Position in the cascade; lower runs first.
    fn priority(&self) -> i32;

    /// Fetch a raw payload. Implementations should stop early when `cancel`
    /// fires and report [`TierError::Cancelled`].
    async fn fetch(&self, query: &Query, cancel: &CancellationToken) -> Result<Payload, TierError>;

    /// Validate and normalize a fetched payload.
    fn validate(&self, raw: Payload) -> Result<Payload, Unusable> {
        NonEmpty.validate(raw)
    }

    /// Whether `raw` is usable.
    fn is_acceptable(&self, raw: &Payload) -> bool {
        self.validate(raw.clone()).is_ok()
    }
}
