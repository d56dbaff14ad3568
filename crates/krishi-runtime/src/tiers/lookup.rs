//! Read-only lookup tiers: cached/recorded data and live external APIs.

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use krishi_core::{Cancelled, NonEmpty, Payload, Query, ResponseValidator, SourceTag, Unusable};

use super::{priority, Tier, TierError};

/// A read interface over some record store or third-party API.
///
/// `Ok(None)` means the source has nothing for this query.
#[async_trait]
pub trait RecordSource: Send + Sync {
    async fn lookup(&self, query: &Query) -> anyhow::Result<Option<Payload>>;

    /// Source name for logs.
    fn name(&self) -> &str {
        "record-source"
    }
}

/// A tier answering from a [`RecordSource`].
pub struct LookupTier {
    source: SourceTag,
    priority: i32,
    records: Arc<dyn RecordSource>,
    validator: Box<dyn ResponseValidator>,
}

impl LookupTier {
    pub fn new(source: SourceTag, priority: i32, records: Arc<dyn RecordSource>) -> Self {
        Self {
            source,
            priority,
            records,
            validator: Box::new(NonEmpty),
        }
    }

    /// Cached or recorded data, tagged `cache`.
    pub fn cache(records: Arc<dyn RecordSource>) -> Self {
        Self::new(SourceTag::Cache, priority::CACHE, records)
    }

    /// A live third-party API, tagged `live-external`.
    pub fn live_external(records: Arc<dyn RecordSource>) -> Self {
        Self::new(SourceTag::LiveExternal, priority::LIVE_EXTERNAL, records)
    }

    pub fn with_validator(mut self, validator: impl ResponseValidator + 'static) -> Self {
        self.validator = Box::new(validator);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

#[async_trait]
impl Tier for LookupTier {
    fn source(&self) -> SourceTag {
        self.source.clone()
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    async fn fetch(&self, query: &Query, cancel: &CancellationToken) -> Result<Payload, TierError> {
        let lookup = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TierError::Cancelled(Cancelled)),
            lookup = self.records.lookup(query) => lookup,
        };

        match lookup {
            Ok(Some(payload)) => Ok(payload),
            Ok(None) => Err(TierError::NotFound),
            Err(e) => Err(TierError::Unavailable(format!("{}: {:#}", self.records.name(), e))),
        }
    }

    fn validate(&self, raw: Payload) -> Result<Payload, Unusable> {
        self.validator.validate(raw)
    }
}
