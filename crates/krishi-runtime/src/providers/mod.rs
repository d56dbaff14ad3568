//! Generative endpoint transports.
//!
//! This module defines the seam between the scheduler and the generative
//! endpoint. A transport performs exactly one call with the credential it is
//! handed; rotation, retries and fallback live above it.
//!
//! ## Security
//!
//! Credentials are [`ApiCredential`]s from the [`secrets`] module and are
//! only exposed at the point where a request header is written.

use async_trait::async_trait;
use krishi_core::Part;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::time::Duration;
use thiserror::Error;

mod gemini;
pub mod secrets;

pub use gemini::{GeminiTransport, GEMINI_DEFAULT_BASE_URL};
pub use secrets::{load_api_keys, ApiCredential, CredentialSource};

/// Errors from a single transport call.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    HttpError(String),

    #[error("Rate limit exceeded, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    ParseError(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

impl ProviderError {
    /// Whether this is the endpoint's rate-limit signal.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ProviderError::RateLimited { .. })
            || matches!(self, ProviderError::ApiError { status: 429, .. })
    }
}

/// One generate-content request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateRequest {
    /// Model identifier
    pub model: String,

    /// Content parts (text and inline data)
    pub parts: Vec<Part>,
}

impl GenerateRequest {
    pub fn new(model: impl Into<String>, parts: Vec<Part>) -> Self {
        Self {
            model: model.into(),
            parts,
        }
    }
}

/// A generative endpoint reachable with pooled credentials.
#[async_trait]
pub trait GenerativeTransport: Send + Sync {
    /// Perform one call, returning the endpoint's JSON envelope.
    ///
    /// Implementations report HTTP 429 as [`ProviderError::RateLimited`].
    async fn generate(
        &self,
        credential: &ApiCredential,
        request: &GenerateRequest,
    ) -> Result<JsonValue, ProviderError>;

    /// Transport name for logs.
    fn name(&self) -> &str;
}

/// Build a generate-content envelope whose first candidate answers `text`.
///
/// Useful for transports that wrap other backends and for tests.
pub fn text_envelope(text: &str) -> JsonValue {
    serde_json::json!({
        "candidates": [
            { "content": { "parts": [ { "text": text } ], "role": "model" } }
        ]
    })
}
