//! Runtime configuration.
//!
//! Loaded from YAML; durations use human-readable strings (`"60s"`,
//! `"2m"`, `"1h 30m"`). Every section has defaults, so an empty document is
//! a valid configuration apart from credentials.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use krishi_core::SelectorConfig;

use crate::providers::GEMINI_DEFAULT_BASE_URL;
use crate::resilience::{CircuitBreakerConfig, RoundBackoff};

/// Errors from loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level runtime configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Generative endpoint settings
    pub provider: ProviderConfig,

    /// Credential pool scoring
    pub pool: PoolConfig,

    /// Executor retry policy
    pub retry: RetryConfig,

    /// Fallback cascade settings
    pub cascade: CascadeConfig,
}

impl RuntimeConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: RuntimeConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml(&yaml)
    }

    /// Render as YAML. Configured API keys are never serialized.
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Check invariants serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.provider.model.trim().is_empty() {
            return invalid("provider.model must not be empty");
        }
        if !self.provider.base_url.starts_with("http://")
            && !self.provider.base_url.starts_with("https://")
        {
            return invalid("provider.base_url must start with http:// or https://");
        }
        if self.pool.max_requests_per_window == 0 {
            return invalid("pool.max_requests_per_window must be at least 1");
        }
        if self.pool.window.is_zero() {
            return invalid("pool.window must be greater than zero");
        }
        if self.retry.max_retry_rounds == 0 {
            return invalid("retry.max_retry_rounds must be at least 1");
        }
        if self.retry.call_timeout.is_zero() {
            return invalid("retry.call_timeout must be greater than zero");
        }
        if self.retry.deadline.is_some_and(|d| d.is_zero()) {
            return invalid("retry.deadline must be greater than zero when set");
        }
        if self.cascade.tier_timeout.is_some_and(|d| d.is_zero()) {
            return invalid("cascade.tier_timeout must be greater than zero when set");
        }
        if let RoundBackoff::Exponential { factor, .. } = self.retry.backoff {
            if !(factor.is_finite() && factor >= 1.0) {
                return invalid("retry.backoff.factor must be at least 1.0");
            }
        }
        Ok(())
    }
}

/// Generative endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Model for the primary generative tier
    pub model: String,

    /// Model for the secondary generative tier (defaults to `model`)
    pub fallback_model: Option<String>,

    /// API base URL
    pub base_url: String,

    /// Keys supplied in the file; prefer the environment
    #[serde(skip_serializing)]
    pub api_keys: Vec<String>,

    /// Environment variable with comma-separated keys
    pub api_keys_env: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            model: "gemini-1.5-flash".to_string(),
            fallback_model: None,
            base_url: GEMINI_DEFAULT_BASE_URL.to_string(),
            api_keys: Vec::new(),
            api_keys_env: "GEMINI_API_KEYS".to_string(),
        }
    }
}

impl ProviderConfig {
    /// Model used by the secondary generative tier.
    pub fn secondary_model(&self) -> &str {
        self.fallback_model.as_deref().unwrap_or(&self.model)
    }
}

/// Credential pool scoring constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Requests each credential may serve per window
    pub max_requests_per_window: u32,

    /// Rate-limit window length
    #[serde(with = "humantime_duration")]
    pub window: Duration,

    /// How long an error de-prioritizes a credential
    #[serde(with = "humantime_duration")]
    pub error_cooldown: Duration,

    /// Score bonus for credentials outside their error cooldown
    pub health_bonus: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        let defaults = SelectorConfig::default();
        Self {
            max_requests_per_window: defaults.max_requests_per_window,
            window: defaults.window,
            error_cooldown: defaults.error_cooldown,
            health_bonus: defaults.health_bonus,
        }
    }
}

impl From<&PoolConfig> for SelectorConfig {
    fn from(config: &PoolConfig) -> Self {
        SelectorConfig {
            max_requests_per_window: config.max_requests_per_window,
            window: config.window,
            error_cooldown: config.error_cooldown,
            health_bonus: config.health_bonus,
        }
    }
}

/// Executor retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Rounds through the pool before a tier gives up
    pub max_retry_rounds: u32,

    /// Bound on one external call
    #[serde(with = "humantime_duration")]
    pub call_timeout: Duration,

    /// Delay schedule between rounds
    pub backoff: RoundBackoff,

    /// Optional wall-clock cap on one `execute`
    #[serde(with = "humantime_duration::option", skip_serializing_if = "Option::is_none")]
    pub deadline: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retry_rounds: 3,
            call_timeout: Duration::from_secs(30),
            backoff: RoundBackoff::default(),
            deadline: None,
        }
    }
}

/// Fallback cascade settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CascadeConfig {
    /// Optional bound on one tier's fetch
    #[serde(with = "humantime_duration::option", skip_serializing_if = "Option::is_none")]
    pub tier_timeout: Option<Duration>,

    /// Payload of the last-resort tier
    pub static_payload: serde_json::Value,

    /// Primary response memo
    pub cache: CacheConfig,

    /// Optional per-tier circuit breaker
    #[serde(skip_serializing_if = "Option::is_none")]
    pub circuit_breaker: Option<CircuitBreakerConfig>,
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            tier_timeout: None,
            static_payload: serde_json::json!({ "status": "unknown" }),
            cache: CacheConfig::default(),
            circuit_breaker: None,
        }
    }
}

/// Primary response memo settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum cached responses
    pub max_entries: u64,

    /// How long a response stays cached
    #[serde(with = "humantime_duration")]
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            ttl: Duration::from_secs(3600),
        }
    }
}

/// Serde helpers for `"60s"`-style durations.
pub(crate) mod humantime_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(serde::de::Error::custom)
    }

    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer};
        use std::time::Duration;

        pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match duration {
                Some(d) => super::serialize(d, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
        where
            D: Deserializer<'de>,
        {
            Option::<String>::deserialize(deserializer)?
                .map(|text| humantime::parse_duration(&text).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}
