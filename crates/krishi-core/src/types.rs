//! Core types shared by the scheduler, the tiers and the cascade.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Where a resolved payload came from.
///
/// Serialized as the kebab-case provenance string (`"primary-ai"`,
/// `"cache"`, ...). Collaborators may introduce their own tags with
/// [`SourceTag::Custom`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SourceTag {
    /// Direct generative call through the credential pool
    PrimaryAi,

    /// Cached or recorded data
    Cache,

    /// Live third-party API
    LiveExternal,

    /// Second generative attempt with a simplified prompt
    SecondaryAi,

    /// Fixed last-resort payload
    Static,

    /// Collaborator-defined source
    Custom(String),
}

impl SourceTag {
    /// The provenance string for this tag.
    pub fn as_str(&self) -> &str {
        match self {
            SourceTag::PrimaryAi => "primary-ai",
            SourceTag::Cache => "cache",
            SourceTag::LiveExternal => "live-external",
            SourceTag::SecondaryAi => "secondary-ai",
            SourceTag::Static => "static",
            SourceTag::Custom(tag) => tag,
        }
    }

    /// Whether a result from this source counts as degraded.
    pub fn is_degraded(&self) -> bool {
        self.as_str() != SourceTag::PrimaryAi.as_str()
    }
}

impl fmt::Display for SourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for SourceTag {
    fn from(tag: &str) -> Self {
        match tag {
            "primary-ai" => SourceTag::PrimaryAi,
            "cache" => SourceTag::Cache,
            "live-external" => SourceTag::LiveExternal,
            "secondary-ai" => SourceTag::SecondaryAi,
            "static" => SourceTag::Static,
            other => SourceTag::Custom(other.to_string()),
        }
    }
}

impl Serialize for SourceTag {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for SourceTag {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        Ok(SourceTag::from(tag.as_str()))
    }
}

/// One content part of a generative request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    /// Plain prompt text
    Text { text: String },

    /// Inline binary content (e.g. a leaf photo), base64-encoded
    Inline { mime_type: String, data: String },
}

impl Part {
    /// Create a text part.
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text { text: text.into() }
    }

    /// Create an inline data part from already base64-encoded data.
    pub fn inline(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Part::Inline {
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }

    /// The text of a text part.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Part::Text { text } => Some(text),
            Part::Inline { .. } => None,
        }
    }
}

/// A logical request walking the cascade.
///
/// `parts` feed the generative tiers, `key` identifies the request for
/// cache/record lookups, and `params` carry structured lookup arguments
/// (commodity, market, state, ...) for the live data tiers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    /// Lookup key for cached and recorded data
    #[serde(default)]
    pub key: String,

    /// Prompt parts supplied by the domain layer
    #[serde(default)]
    pub parts: Vec<Part>,

    /// Structured lookup parameters
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl Query {
    /// Create a query from a single text prompt.
    pub fn text(prompt: impl Into<String>) -> Self {
        Self {
            parts: vec![Part::text(prompt)],
            ..Default::default()
        }
    }

    /// Set the lookup key.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    /// Append a content part.
    pub fn with_part(mut self, part: Part) -> Self {
        self.parts.push(part);
        self
    }

    /// Add a structured lookup parameter.
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Get a lookup parameter.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }
}

/// Raw or validated output of a tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    /// Unstructured text
    Text(String),

    /// Structured data (parsed model output, records, API responses)
    Json(serde_json::Value),
}

impl Payload {
    /// Text view of the payload; JSON is rendered compactly.
    pub fn as_text(&self) -> Cow<'_, str> {
        match self {
            Payload::Text(text) => Cow::Borrowed(text),
            Payload::Json(value) => Cow::Owned(value.to_string()),
        }
    }

    /// The JSON value, if this payload is structured.
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Payload::Json(value) => Some(value),
            Payload::Text(_) => None,
        }
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        Payload::Json(value)
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_string())
    }
}

/// The caller aborted the resolution.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("resolution cancelled by caller")]
pub struct Cancelled;

/// Why a tier was passed over during a resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum TierFailure {
    /// The tier's fetch failed (error, exhaustion, timeout, panic)
    Failed(String),

    /// The tier answered, but its output failed validation
    Unusable(String),

    /// The tier's circuit was open
    Skipped,
}

/// One passed-over tier in a resolution trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierAttempt {
    /// Source tag of the tier
    pub source: SourceTag,

    /// What went wrong
    pub failure: TierFailure,
}

/// The answer to one logical request.
///
/// Always carries a payload; `degraded` is set whenever the payload did not
/// come from the primary generative tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CascadeResult {
    payload: Payload,
    source: SourceTag,
    degraded: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    trail: Vec<TierAttempt>,
    resolved_at: DateTime<Utc>,
}

impl CascadeResult {
    /// Create a result for a payload from `source`.
    pub fn new(payload: Payload, source: SourceTag) -> Self {
        Self::with_trail(payload, source, Vec::new())
    }

    /// Create a result that records the tiers tried before `source`.
    pub fn with_trail(payload: Payload, source: SourceTag, trail: Vec<TierAttempt>) -> Self {
        let degraded = source.is_degraded();
        Self {
            payload,
            source,
            degraded,
            trail,
            resolved_at: Utc::now(),
        }
    }

    /// The resolved payload.
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Consume the result, returning the payload.
    pub fn into_payload(self) -> Payload {
        self.payload
    }

    /// Which tier produced the payload.
    pub fn source(&self) -> &SourceTag {
        &self.source
    }

    /// Whether the payload is a best-effort answer.
    pub fn degraded(&self) -> bool {
        self.degraded
    }

    /// Tiers passed over before the winning one, in order.
    pub fn trail(&self) -> &[TierAttempt] {
        &self.trail
    }

    /// When the resolution finished.
    pub fn resolved_at(&self) -> DateTime<Utc> {
        self.resolved_at
    }
}
