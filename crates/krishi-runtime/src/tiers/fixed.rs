//! The last-resort tier.

use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use krishi_core::{Payload, Query, SourceTag, Unusable};

use super::{priority, Tier, TierError};

/// Returns a fixed payload and accepts it unconditionally.
#[derive(Debug, Clone)]
pub struct StaticTier {
    payload: Payload,
}

impl StaticTier {
    pub fn new(payload: impl Into<Payload>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }
}

impl Default for StaticTier {
    fn default() -> Self {
        Self::new(json!({ "status": "unknown" }))
    }
}

#[async_trait]
impl Tier for StaticTier {
    fn source(&self) -> SourceTag {
        SourceTag::Static
    }

    fn priority(&self) -> i32 {
        priority::STATIC
    }

    async fn fetch(&self, _query: &Query, _cancel: &CancellationToken) -> Result<Payload, TierError> {
        Ok(self.payload.clone())
    }

    fn validate(&self, raw: Payload) -> Result<Payload, Unusable> {
        Ok(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_default_payload_is_always_acceptable() {
        let tier = StaticTier::default();
        let payload = tier.fetch(&Query::default(), &CancellationToken::new()).await.unwrap();

        assert_eq!(payload, Payload::Json(json!({"status": "unknown"})));
        assert!(tier.is_acceptable(&payload));
        assert!(tier.is_acceptable(&Payload::Text(String::new())));
    }
}
