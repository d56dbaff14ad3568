//! Reducing generative-endpoint output to usable values.
//!
//! Two steps, each tested on its own:
//!
//! 1. [`candidate_text`] pulls the answer text out of the endpoint's JSON
//!    envelope: `candidates[0].content.parts[0].text`.
//! 2. [`extract_json_object`] recovers a JSON object embedded in prose.
//!
//! ## Extraction grammar
//!
//! ```text
//! text   := prose? object prose?
//! object := the substring from the FIRST '{' to the LAST '}' (inclusive)
//! ```
//!
//! The object substring must parse as a JSON object. Anything else (no
//! braces, braces in the wrong order, invalid JSON, a non-object) is
//! [`Unusable`]; a partially parsed value is never returned.

use serde_json::{Map, Value};
use thiserror::Error;

/// Output that is syntactically unusable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unusable response: {reason}")]
pub struct Unusable {
    /// What was wrong with the output
    pub reason: String,
}

impl Unusable {
    /// Create an error with the given reason.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Answer text from a generate-content envelope.
///
/// Returns `None` when the path is missing, is not a string, or is blank
/// after trimming. The returned text is trimmed.
pub fn candidate_text(envelope: &Value) -> Option<String> {
    let text = envelope
        .get("candidates")?
        .get(0)?
        .get("content")?
        .get("parts")?
        .get(0)?
        .get("text")?
        .as_str()?
        .trim();

    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

/// Slice of `text` from the first `{` to the last `}`.
pub fn object_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}

/// Parse the JSON object embedded in `text`.
pub fn extract_json_object(text: &str) -> Result<Map<String, Value>, Unusable> {
    let span = object_span(text).ok_or_else(|| Unusable::new("no JSON object found"))?;

    match serde_json::from_str::<Value>(span) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(Unusable::new("embedded JSON is not an object")),
        Err(e) => Err(Unusable::new(format!("embedded JSON does not parse: {}", e))),
    }
}
