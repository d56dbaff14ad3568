//! Per-tier validation predicates.
//!
//! A validator decides whether a tier's raw output is usable and, if so,
//! normalizes it (for example text containing a JSON object becomes
//! [`Payload::Json`]). Validators compose with [`ValidatorChain`].
//!
//! The generic validators only judge syntax. Placeholder answers such as
//! `{"plant": "Unknown"}` pass them; a collaborator that wants those treated
//! as unusable adds [`RejectPlaceholders`] to its tier.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::extract::{extract_json_object, Unusable};
use crate::types::Payload;

lazy_static! {
    /// Generic "no real answer" values
    static ref PLACEHOLDER_PATTERN: Regex = Regex::new(
        r"(?i)^\s*(unknown|n/?a|none|null|nil|not available|not applicable|not known|-+|\?+)?\s*$"
    ).unwrap();
}

/// Decides whether a tier's raw output is usable.
pub trait ResponseValidator: Send + Sync {
    /// Validate and normalize `raw`.
    fn validate(&self, raw: Payload) -> Result<Payload, Unusable>;

    /// Whether `raw` would pass validation.
    fn is_acceptable(&self, raw: &Payload) -> bool {
        self.validate(raw.clone()).is_ok()
    }
}

impl<V: ResponseValidator + ?Sized> ResponseValidator for Box<V> {
    fn validate(&self, raw: Payload) -> Result<Payload, Unusable> {
        (**self).validate(raw)
    }
}

/// Accepts everything. Used by the static tier.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl ResponseValidator for AcceptAll {
    fn validate(&self, raw: Payload) -> Result<Payload, Unusable> {
        Ok(raw)
    }
}

/// Rejects null, empty and whitespace-only output.
#[derive(Debug, Clone, Copy, Default)]
pub struct NonEmpty;

impl ResponseValidator for NonEmpty {
    fn validate(&self, raw: Payload) -> Result<Payload, Unusable> {
        let empty = match &raw {
            Payload::Text(text) => text.trim().is_empty(),
            Payload::Json(Value::Null) => true,
            Payload::Json(Value::String(s)) => s.trim().is_empty(),
            Payload::Json(Value::Object(map)) => map.is_empty(),
            Payload::Json(Value::Array(items)) => items.is_empty(),
            Payload::Json(_) => false,
        };

        if empty {
            Err(Unusable::new("empty output"))
        } else {
            Ok(raw)
        }
    }
}

/// Requires a JSON object, extracting it from prose when needed.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonObject;

impl ResponseValidator for JsonObject {
    fn validate(&self, raw: Payload) -> Result<Payload, Unusable> {
        into_object(raw).map(|map| Payload::Json(Value::Object(map)))
    }
}

/// Requires the listed top-level fields to be present and non-null.
#[derive(Debug, Clone, Default)]
pub struct RequireFields {
    fields: Vec<String>,
}

impl RequireFields {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }
}

impl ResponseValidator for RequireFields {
    fn validate(&self, raw: Payload) -> Result<Payload, Unusable> {
        let map = into_object(raw)?;
        let missing: Vec<&str> = self
            .fields
            .iter()
            .filter(|f| map.get(f.as_str()).map_or(true, Value::is_null))
            .map(String::as_str)
            .collect();

        if missing.is_empty() {
            Ok(Payload::Json(Value::Object(map)))
        } else {
            Err(Unusable::new(format!("missing fields: {}", missing.join(", "))))
        }
    }
}

/// Rejects objects whose checked fields are all placeholders.
///
/// With no fields configured every top-level value is checked. Missing
/// fields count as placeholders.
#[derive(Debug, Clone, Default)]
pub struct RejectPlaceholders {
    fields: Vec<String>,
}

impl RejectPlaceholders {
    /// Check every top-level value.
    pub fn all() -> Self {
        Self::default()
    }

    /// Check only the listed fields.
    pub fn fields<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }
}

impl ResponseValidator for RejectPlaceholders {
    fn validate(&self, raw: Payload) -> Result<Payload, Unusable> {
        let map = into_object(raw)?;

        let all_placeholders = if self.fields.is_empty() {
            map.values().all(is_placeholder)
        } else {
            self.fields
                .iter()
                .all(|f| map.get(f.as_str()).map_or(true, is_placeholder))
        };

        if all_placeholders {
            Err(Unusable::new("only placeholder values"))
        } else {
            Ok(Payload::Json(Value::Object(map)))
        }
    }
}

/// Whether a JSON value is a generic placeholder ("Unknown", "N/A", "", null).
pub fn is_placeholder(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => PLACEHOLDER_PATTERN.is_match(s),
        _ => false,
    }
}

/// Errors from building a schema validator.
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Failed to compile schema: {0}")]
    Compile(String),
}

/// Checks an extracted object against a JSON Schema.
pub struct SchemaValidator {
    schema: jsonschema::Validator,
}

impl SchemaValidator {
    /// Compile `schema`.
    pub fn new(schema: &Value) -> Result<Self, SchemaError> {
        let schema = jsonschema::options()
            .build(schema)
            .map_err(|e| SchemaError::Compile(e.to_string()))?;
        Ok(Self { schema })
    }
}

impl std::fmt::Debug for SchemaValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaValidator").finish_non_exhaustive()
    }
}

impl ResponseValidator for SchemaValidator {
    fn validate(&self, raw: Payload) -> Result<Payload, Unusable> {
        let value = Value::Object(into_object(raw)?);
        let errors: Vec<String> = self
            .schema
            .iter_errors(&value)
            .map(|e| format!("{} at {}", e, e.instance_path))
            .collect();

        if errors.is_empty() {
            Ok(Payload::Json(value))
        } else {
            Err(Unusable::new(format!("schema violations: {}", errors.join("; "))))
        }
    }
}

/// Runs validators in order, feeding each the previous one's output.
#[derive(Default)]
pub struct ValidatorChain {
    steps: Vec<Box<dyn ResponseValidator>>,
}

impl ValidatorChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a validator.
    pub fn then(mut self, validator: impl ResponseValidator + 'static) -> Self {
        self.steps.push(Box::new(validator));
        self
    }
}

impl ResponseValidator for ValidatorChain {
    fn validate(&self, raw: Payload) -> Result<Payload, Unusable> {
        self.steps.iter().try_fold(raw, |payload, step| step.validate(payload))
    }
}

fn into_object(raw: Payload) -> Result<Map<String, Value>, Unusable> {
    match raw {
        Payload::Json(Value::Object(map)) => Ok(map),
        Payload::Json(Value::String(text)) | Payload::Text(text) => {
            if text.trim().is_empty() {
                return Err(Unusable::new("empty output"));
            }
            extract_json_object(&text)
        }
        Payload::Json(Value::Null) => Err(Unusable::new("empty output")),
        Payload::Json(_) => Err(Unusable::new("expected a JSON object")),
    }
}
