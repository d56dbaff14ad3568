//! Tiers backed by the generative endpoint through the request executor.

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use krishi_core::{Cancelled, NonEmpty, Part, Payload, Query, ResponseValidator, SourceTag, Unusable};

use super::{priority, Tier, TierError};
use crate::executor::{AttemptOutcome, RequestExecutor};
use crate::providers::GenerateRequest;

/// Turns a query into the content parts sent to the endpoint.
///
/// Prompt wording belongs to the domain layer; implement this to supply it.
pub trait PromptBuilder: Send + Sync {
    fn build(&self, query: &Query) -> Vec<Part>;
}

/// Sends the query's parts unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryPrompt;

impl PromptBuilder for QueryPrompt {
    fn build(&self, query: &Query) -> Vec<Part> {
        query.parts.clone()
    }
}

/// A lighter prompt for the second generative attempt.
///
/// Keeps an instruction, the first text part of the query (shortened to
/// `max_chars`) and any inline data.
#[derive(Debug, Clone)]
pub struct SimplifiedPrompt {
    instruction: String,
    max_chars: usize,
}

impl SimplifiedPrompt {
    pub fn new(instruction: impl Into<String>) -> Self {
        Self {
            instruction: instruction.into(),
            max_chars: 500,
        }
    }

    /// Cap on the length of the kept text part.
    pub fn with_max_chars(mut self, max_chars: usize) -> Self {
        self.max_chars = max_chars;
        self
    }
}

impl Default for SimplifiedPrompt {
    fn default() -> Self {
        Self::new("Answer briefly. If the answer is structured, reply with a single JSON object.")
    }
}

impl PromptBuilder for SimplifiedPrompt {
    fn build(&self, query: &Query) -> Vec<Part> {
        let mut parts = Vec::new();
        if !self.instruction.is_empty() {
            parts.push(Part::text(self.instruction.clone()));
        }

        if let Some(text) = query.parts.iter().find_map(Part::as_text) {
            let shortened: String = text.chars().take(self.max_chars).collect();
            parts.push(Part::text(shortened));
        }

        parts.extend(
            query
                .parts
                .iter()
                .filter(|p| matches!(p, Part::Inline { .. }))
                .cloned(),
        );
        parts
    }
}

/// A generative call through the shared credential pool.
pub struct GenerativeTier {
    source: SourceTag,
    priority: i32,
    model: String,
    executor: Arc<RequestExecutor>,
    prompt: Box<dyn PromptBuilder>,
    validator: Box<dyn ResponseValidator>,
}

impl GenerativeTier {
    /// The primary tier: the query as given, result tagged `primary-ai`.
    pub fn primary(executor: Arc<RequestExecutor>, model: impl Into<String>) -> Self {
        Self {
            source: SourceTag::PrimaryAi,
            priority: priority::PRIMARY_AI,
            model: model.into(),
            executor,
            prompt: Box::new(QueryPrompt),
            validator: Box::new(NonEmpty),
        }
    }

    /// The secondary tier: a simplified prompt, result tagged `secondary-ai`.
    pub fn secondary(executor: Arc<RequestExecutor>, model: impl Into<String>) -> Self {
        Self {
            source: SourceTag::SecondaryAi,
            priority: priority::SECONDARY_AI,
            model: model.into(),
            executor,
            prompt: Box::new(SimplifiedPrompt::default()),
            validator: Box::new(NonEmpty),
        }
    }

    pub fn with_prompt(mut self, prompt: impl PromptBuilder + 'static) -> Self {
        self.prompt = Box::new(prompt);
        self
    }

    pub fn with_validator(mut self, validator: impl ResponseValidator + 'static) -> Self {
        self.validator = Box::new(validator);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl Tier for GenerativeTier {
    fn source(&self) -> SourceTag {
        self.source.clone()
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    async fn fetch(&self, query: &Query, cancel: &CancellationToken) -> Result<Payload, TierError> {
        let parts = self.prompt.build(query);
        if parts.is_empty() {
            return Err(TierError::Unavailable("prompt has no content parts".to_string()));
        }

        let request = GenerateRequest::new(self.model.clone(), parts);
        match self.executor.execute(&request, cancel).await {
            AttemptOutcome::Success(text) => Ok(Payload::Text(text)),
            AttemptOutcome::RateLimited(cause) | AttemptOutcome::Transient(cause) => {
                Err(TierError::Exhausted(cause))
            }
            AttemptOutcome::Cancelled => Err(TierError::Cancelled(Cancelled)),
        }
    }

    fn validate(&self, raw: Payload) -> Result<Payload, Unusable> {
        self.validator.validate(raw)
    }
}
