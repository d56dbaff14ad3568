//! Secure credential handling for the credential pool.
//!
//! Every pooled key is wrapped in an [`ApiCredential`] as soon as it is
//! read. Using this module ensures:
//!
//! - **No accidental logging**: credentials cannot appear in Debug/Display output
//! - **Memory safety**: credentials are zeroed on drop
//! - **Explicit exposure**: the raw value is only reachable through `.expose()`
//!
//! ## Loading order
//!
//! [`load_api_keys`] takes the first non-empty source of:
//! 1. `provider.api_keys` in the configuration
//! 2. the comma-separated list in `provider.api_keys_env` (default `GEMINI_API_KEYS`)
//! 3. the single key in `GEMINI_API_KEY`

use secrecy::{ExposeSecret, SecretString};
use std::fmt;

use super::ProviderError;
use crate::config::ProviderConfig;

/// Environment variable holding a single fallback key.
pub const GEMINI_API_KEY_ENV: &str = "GEMINI_API_KEY";

/// Human-readable name used for pooled keys.
const POOLED_KEY_NAME: &str = "Gemini API key";

/// Where a credential was loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    /// Loaded from configuration file
    Config,
    /// Loaded from environment variable
    Environment,
    /// Provided programmatically
    Programmatic,
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialSource::Config => write!(f, "config"),
            CredentialSource::Environment => write!(f, "environment"),
            CredentialSource::Programmatic => write!(f, "programmatic"),
        }
    }
}

/// A securely-stored API credential.
///
/// Debug and Display show `[REDACTED]`; the value is zeroed on drop.
pub struct ApiCredential {
    value: SecretString,
    source: CredentialSource,
    name: &'static str,
}

impl ApiCredential {
    /// Wrap a credential value.
    pub fn new(value: impl Into<String>, source: CredentialSource, name: &'static str) -> Self {
        Self {
            value: SecretString::from(value.into()),
            source,
            name,
        }
    }

    /// Wrap a programmatically supplied pool key.
    pub fn pooled(value: impl Into<String>) -> Self {
        Self::new(value, CredentialSource::Programmatic, POOLED_KEY_NAME)
    }

    /// Expose the value for use in a request header.
    ///
    /// Only call this at the point of use; never store the result.
    pub fn expose(&self) -> &str {
        self.value.expose_secret()
    }

    /// Check if the credential is empty.
    pub fn is_empty(&self) -> bool {
        self.value.expose_secret().is_empty()
    }

    /// Get the source of this credential.
    pub fn source(&self) -> CredentialSource {
        self.source
    }

    /// Get the human-readable name of this credential.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Debug for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCredential")
            .field("value", &"[REDACTED]")
            .field("source", &self.source)
            .field("name", &self.name)
            .finish()
    }
}

impl fmt::Display for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} from {} [REDACTED]", self.name, self.source)
    }
}

/// Load the credential pool's keys.
pub fn load_api_keys(config: &ProviderConfig) -> Result<Vec<ApiCredential>, ProviderError> {
    let configured = split_keys(config.api_keys.iter().map(String::as_str));
    if !configured.is_empty() {
        return Ok(wrap(configured, CredentialSource::Config));
    }

    if let Ok(list) = std::env::var(&config.api_keys_env) {
        let keys = split_keys(list.split(','));
        if !keys.is_empty() {
            return Ok(wrap(keys, CredentialSource::Environment));
        }
    }

    if let Ok(single) = std::env::var(GEMINI_API_KEY_ENV) {
        let keys = split_keys(std::iter::once(single.as_str()));
        if !keys.is_empty() {
            return Ok(wrap(keys, CredentialSource::Environment));
        }
    }

    Err(ProviderError::NotConfigured(format!(
        "{} required: set 'provider.api_keys' in config, {} (comma-separated) or {} environment variable",
        POOLED_KEY_NAME, config.api_keys_env, GEMINI_API_KEY_ENV
    )))
}

fn split_keys<'a>(raw: impl Iterator<Item = &'a str>) -> Vec<String> {
    raw.map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect()
}

fn wrap(keys: Vec<String>, source: CredentialSource) -> Vec<ApiCredential> {
    keys.into_iter()
        .map(|k| ApiCredential::new(k, source, POOLED_KEY_NAME))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider_config(env: &str) -> ProviderConfig {
        ProviderConfig {
            api_keys_env: env.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_credential_redacted_in_debug() {
        let secret = "AIza-super-secret-key-12345";
        let cred = ApiCredential::pooled(secret);

        let debug = format!("{:?}", cred);
        assert!(!debug.contains(secret), "Secret exposed in Debug!");
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_credential_redacted_in_display() {
        let secret = "AIza-super-secret-key-12345";
        let cred = ApiCredential::new(secret, CredentialSource::Config, "Test API key");

        let display = format!("{}", cred);
        assert!(!display.contains(secret), "Secret exposed in Display!");
        assert!(display.contains("[REDACTED]"));
        assert!(display.contains("Test API key"));
        assert!(display.contains("config"));
    }

    #[test]
    fn test_credential_expose() {
        let cred = ApiCredential::pooled("key-1");
        assert_eq!(cred.expose(), "key-1");
        assert_eq!(cred.source(), CredentialSource::Programmatic);
        assert!(!cred.is_empty());
    }

    #[test]
    fn test_config_keys_take_precedence() {
        std::env::set_var("KRISHI_TEST_KEYS_PRIORITY", "env-a,env-b");
        let mut config = provider_config("KRISHI_TEST_KEYS_PRIORITY");
        config.api_keys = vec!["cfg-a".to_string(), "  ".to_string(), "cfg-b".to_string()];

        let keys = load_api_keys(&config).unwrap();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].expose(), "cfg-a");
        assert_eq!(keys[1].source(), CredentialSource::Config);

        std::env::remove_var("KRISHI_TEST_KEYS_PRIORITY");
    }

    #[test]
    fn test_env_list_is_split_and_trimmed() {
        std::env::set_var("KRISHI_TEST_KEYS_LIST", " k1, k2 ,,k3 ");
        let keys = load_api_keys(&provider_config("KRISHI_TEST_KEYS_LIST")).unwrap();

        let exposed: Vec<&str> = keys.iter().map(|k| k.expose()).collect();
        assert_eq!(exposed, vec!["k1", "k2", "k3"]);
        assert!(keys.iter().all(|k| k.source() == CredentialSource::Environment));

        std::env::remove_var("KRISHI_TEST_KEYS_LIST");
    }

    #[test]
    fn test_missing_keys_error_names_sources() {
        // Only meaningful when the single-key fallback is not set in the environment
        if std::env::var(GEMINI_API_KEY_ENV).is_ok() {
            return;
        }
        let err = load_api_keys(&provider_config("KRISHI_TEST_KEYS_NONEXISTENT_12345")).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("provider.api_keys"));
        assert!(message.contains("KRISHI_TEST_KEYS_NONEXISTENT_12345"));
        assert!(message.contains(GEMINI_API_KEY_ENV));
    }
}
