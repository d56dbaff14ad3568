//! Gemini generate-content transport.
//!
//! Sends `POST {base_url}/models/{model}:generateContent` with the pooled
//! key in the `x-goog-api-key` header and returns the raw JSON envelope.
//! HTTP 429 maps to [`ProviderError::RateLimited`]; every other non-2xx
//! status maps to [`ProviderError::ApiError`].
//!
//! The HTTP client is only compiled with the `gemini` feature. Without it,
//! calls fail with [`ProviderError::NotConfigured`].

use super::{secrets::ApiCredential, GenerateRequest, GenerativeTransport, ProviderError};
use crate::config::ProviderConfig;
use async_trait::async_trait;
use krishi_core::Part;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::time::Duration;

/// Public Gemini API endpoint.
pub const GEMINI_DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Transport for the Gemini generate-content API.
///
/// Holds no credential of its own: the executor hands it one pooled key per
/// call.
pub struct GeminiTransport {
    base_url: String,
    timeout: Duration,
    #[cfg(feature = "gemini")]
    client: reqwest::Client,
}

impl std::fmt::Debug for GeminiTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiTransport")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl GeminiTransport {
    /// Create a transport for the public endpoint.
    pub fn new() -> Result<Self, ProviderError> {
        Ok(Self {
            base_url: GEMINI_DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(30),
            #[cfg(feature = "gemini")]
            client: reqwest::Client::builder()
                .build()
                .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {}", e)))?,
        })
    }

    /// Create from provider configuration.
    pub fn from_config(config: &ProviderConfig) -> Result<Self, ProviderError> {
        if !config.base_url.starts_with("http://") && !config.base_url.starts_with("https://") {
            return Err(ProviderError::NotConfigured(
                "base_url must start with http:// or https://".to_string(),
            ));
        }
        Ok(Self::new()?.with_base_url(config.base_url.clone()))
    }

    /// Set custom base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set the per-request HTTP timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The configured base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, model: &str) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            model
        )
    }
}

/// Gemini request format.
#[derive(Debug, Serialize)]
struct GeminiRequest<'a> {
    contents: Vec<GeminiContent<'a>>,
}

#[derive(Debug, Serialize)]
struct GeminiContent<'a> {
    role: &'static str,
    parts: Vec<GeminiPart<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum GeminiPart<'a> {
    Text { text: &'a str },
    Inline { inline_data: InlineData<'a> },
}

#[derive(Debug, Serialize)]
struct InlineData<'a> {
    mime_type: &'a str,
    data: &'a str,
}

/// Gemini error body.
#[derive(Debug, Deserialize)]
#[allow(dead_code)] // Only read with the `gemini` feature
struct GeminiError {
    error: GeminiErrorDetail,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)] // Only read with the `gemini` feature
struct GeminiErrorDetail {
    message: String,
    #[serde(default)]
    status: Option<String>,
}

fn request_body(request: &GenerateRequest) -> GeminiRequest<'_> {
    let parts = request
        .parts
        .iter()
        .map(|part| match part {
            Part::Text { text } => GeminiPart::Text { text },
            Part::Inline { mime_type, data } => GeminiPart::Inline {
                inline_data: InlineData { mime_type, data },
            },
        })
        .collect();

    GeminiRequest {
        contents: vec![GeminiContent { role: "user", parts }],
    }
}

#[async_trait]
impl GenerativeTransport for GeminiTransport {
    #[cfg(feature = "gemini")]
    async fn generate(
        &self,
        credential: &ApiCredential,
        request: &GenerateRequest,
    ) -> Result<JsonValue, ProviderError> {
        // SECURITY: Only expose the credential here, at the point of use
        let response = self
            .client
            .post(self.endpoint(&request.model))
            .header("x-goog-api-key", credential.expose())
            .header("content-type", "application/json")
            .timeout(self.timeout)
            .json(&request_body(request))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(self.timeout)
                } else {
                    ProviderError::HttpError(e.to_string())
                }
            })?;

        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(ProviderError::RateLimited { retry_after });
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<GeminiError>(&body)
                .map(|e| e.error.message)
                .unwrap_or_else(|_| body.chars().take(200).collect());

            return Err(ProviderError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<JsonValue>()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))
    }

    #[cfg(not(feature = "gemini"))]
    async fn generate(
        &self,
        _credential: &ApiCredential,
        _request: &GenerateRequest,
    ) -> Result<JsonValue, ProviderError> {
        Err(ProviderError::NotConfigured(
            "Gemini transport requires the 'gemini' feature".to_string(),
        ))
    }

    fn name(&self) -> &str {
        "gemini"
    }
}
