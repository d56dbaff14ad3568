//! # krishi-core
//!
//! Deterministic building blocks for resolving farmer queries against a
//! scarce, rate-limited generative endpoint.
//!
//! This crate answers three questions without doing any I/O:
//! - Which credential should the next call use?
//! - What text did the endpoint actually answer with?
//! - Is a tier's output usable?
//!
//! ## Key Guarantees
//!
//! 1. **Deterministic**: credential selection is a pure function of usage
//!    state and the current instant, ties resolve to the lowest id
//! 2. **No I/O**: no clocks, locks or network calls live here
//! 3. **Strict parsing**: embedded JSON is either a whole object or
//!    [`Unusable`], never a partial value
//!
//! ## Example
//!
//! ```rust
//! use std::time::Instant;
//! use krishi_core::{KeySelector, Selection, UsageRecord};
//!
//! let now = Instant::now();
//! let records: Vec<UsageRecord> = (0..3).map(|id| UsageRecord::new(id, now)).collect();
//!
//! let selector = KeySelector::default();
//! assert_eq!(selector.select(&records, now), Selection::Ready(0));
//! ```

pub mod credential;
pub mod extract;
pub mod selector;
pub mod types;
pub mod validator;

pub use credential::{CredentialId, UsageRecord};
pub use extract::{candidate_text, extract_json_object, object_span, Unusable};
pub use selector::{KeySelector, Selection, SelectorConfig};
pub use types::{
    Cancelled, CascadeResult, Part, Payload, Query, SourceTag, TierAttempt, TierFailure,
};
pub use validator::{
    is_placeholder, AcceptAll, JsonObject, NonEmpty, RejectPlaceholders, RequireFields,
    ResponseValidator, SchemaError, SchemaValidator, ValidatorChain,
};
