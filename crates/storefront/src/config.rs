//! Storefront client configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `CARTSYNC_BASE_URL` - Base URL of the order/checkout backend
//!
//! ## Optional
//! - `CARTSYNC_APP_KEY` - Application key sent with every request
//! - `CARTSYNC_APP_TOKEN` - Application token sent with every request (secret)
//! - `CARTSYNC_AUTH_TOKEN` - Customer session token to start with (secret)
//! - `CARTSYNC_CREDENTIAL_SCHEME` - `bearer`, `header:<name>` or `cookie:<name>`
//!   (default: `header:VtexIdclientAutCookie`)
//! - `CARTSYNC_SELLER` - Seller id attached to cart items (default: 1)
//! - `CARTSYNC_DEBOUNCE_MS` - Reconciliation debounce window (default: 1500)
//! - `CARTSYNC_REQUEST_TIMEOUT_SECS` - HTTP request timeout (default: 30)
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name

use std::time::Duration;

use cartsync_core::SellerId;
use secrecy::SecretString;
use thiserror::Error;
use url::Url;

use crate::transport::CredentialScheme;

/// Default trailing debounce window before a reconciliation is sent.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(1500);

/// Default HTTP request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
    "xxx",
    "todo",
    "insert",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
}

/// Top-level client configuration.
#[derive(Debug, Clone)]
pub struct StorefrontConfig {
    /// Backend connection settings
    pub backend: BackendConfig,
    /// Cart sync behaviour
    pub sync: SyncConfig,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment name
    pub sentry_environment: Option<String>,
}

/// Backend connection settings.
///
/// Implements `Debug` manually to redact secret fields.
#[derive(Clone)]
pub struct BackendConfig {
    /// Base URL of the order/checkout API
    pub base_url: Url,
    /// Application key header value
    pub app_key: Option<String>,
    /// Application token header value
    pub app_token: Option<SecretString>,
    /// Initial customer credential
    pub auth_token: Option<SecretString>,
    /// How the customer credential is attached to requests
    pub credential_scheme: CredentialScheme,
    /// Per-request timeout
    pub request_timeout: Duration,
}

impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConfig")
            .field("base_url", &self.base_url.as_str())
            .field("app_key", &self.app_key)
            .field("app_token", &self.app_token.as_ref().map(|_| "[REDACTED]"))
            .field("auth_token", &self.auth_token.as_ref().map(|_| "[REDACTED]"))
            .field("credential_scheme", &self.credential_scheme)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// Cart sync engine settings.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Trailing debounce window for reconciliation
    pub debounce: Duration,
    /// Seller attached to items sent to the backend
    pub seller: SellerId,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            seller: SellerId::default(),
        }
    }
}

impl StorefrontConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing, invalid, or
    /// if a secret looks like a placeholder.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        Ok(Self {
            backend: BackendConfig::from_env()?,
            sync: SyncConfig::from_env()?,
            sentry_dsn: get_optional_env("SENTRY_DSN"),
            sentry_environment: get_optional_env("SENTRY_ENVIRONMENT"),
        })
    }
}

impl BackendConfig {
    /// Settings for a backend at `base_url` with no credentials.
    #[must_use]
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            app_key: None,
            app_token: None,
            auth_token: None,
            credential_scheme: CredentialScheme::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    fn from_env() -> Result<Self, ConfigError> {
        let base_url = parse_base_url("CARTSYNC_BASE_URL", &get_required_env("CARTSYNC_BASE_URL")?)?;

        let credential_scheme = get_optional_env("CARTSYNC_CREDENTIAL_SCHEME")
            .map(|raw| {
                raw.parse::<CredentialScheme>().map_err(|e| {
                    ConfigError::InvalidEnvVar("CARTSYNC_CREDENTIAL_SCHEME".to_string(), e)
                })
            })
            .transpose()?
            .unwrap_or_default();

        let timeout_secs = parse_env_u64("CARTSYNC_REQUEST_TIMEOUT_SECS", 30)?;

        Ok(Self {
            base_url,
            app_key: get_optional_env("CARTSYNC_APP_KEY"),
            app_token: get_optional_env("CARTSYNC_APP_TOKEN")
                .map(|token| validated_secret("CARTSYNC_APP_TOKEN", token))
                .transpose()?,
            auth_token: get_optional_env("CARTSYNC_AUTH_TOKEN").map(SecretString::from),
            credential_scheme,
            request_timeout: Duration::from_secs(timeout_secs),
        })
    }
}

impl SyncConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let debounce_ms = parse_env_u64("CARTSYNC_DEBOUNCE_MS", 1500)?;
        Ok(Self {
            debounce: Duration::from_millis(debounce_ms),
            seller: SellerId::new(get_env_or_default("CARTSYNC_SELLER", "1")),
        })
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get an optional environment variable, treating empty values as unset.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    get_optional_env(key).unwrap_or_else(|| default.to_string())
}

fn parse_env_u64(key: &str, default: u64) -> Result<u64, ConfigError> {
    get_optional_env(key).map_or(Ok(default), |raw| {
        raw.parse::<u64>()
            .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
    })
}

/// Parse a base URL, requiring an http(s) scheme.
fn parse_base_url(key: &str, raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw.trim_end_matches('/'))
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidEnvVar(
            key.to_string(),
            format!("unsupported scheme '{}'", url.scheme()),
        ));
    }
    Ok(url)
}

/// Reject secrets that look like copied placeholder values.
fn validate_secret_strength(secret: &str, var_name: &str) -> Result<(), ConfigError> {
    let lower = secret.to_lowercase();

    for pattern in PLACEHOLDER_PATTERNS {
        if lower.contains(pattern) {
            return Err(ConfigError::InsecureSecret(
                var_name.to_string(),
                format!("appears to be a placeholder (contains '{pattern}')"),
            ));
        }
    }

    Ok(())
}

fn validated_secret(key: &str, value: String) -> Result<SecretString, ConfigError> {
    validate_secret_strength(&value, key)?;
    Ok(SecretString::from(value))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_secret_strength_placeholder() {
        let result = validate_secret_strength("your-app-token-here", "TEST_VAR");
        assert!(matches!(result, Err(ConfigError::InsecureSecret(_, _))));
    }

    #[test]
    fn test_validate_secret_strength_valid() {
        let result = validate_secret_strength("aB3$xY9!mK2@nL5#pQ7&rT0*uW4^zC6", "TEST_VAR");
        assert!(result.is_ok());
    }

    #[test]
    fn test_parse_base_url_strips_trailing_slash() {
        let url = parse_base_url("TEST_URL", "https://store.example.com/").unwrap();
        assert_eq!(url.as_str(), "https://store.example.com/");
        assert_eq!(url.host_str(), Some("store.example.com"));
    }

    #[test]
    fn test_parse_base_url_rejects_other_schemes() {
        let result = parse_base_url("TEST_URL", "ftp://store.example.com");
        assert!(matches!(result, Err(ConfigError::InvalidEnvVar(_, _))));
    }

    #[test]
    fn test_sync_config_default() {
        let config = SyncConfig::default();
        assert_eq!(config.debounce, Duration::from_millis(1500));
        assert_eq!(config.seller.as_str(), "1");
    }

    #[test]
    fn test_backend_config_debug_redacts_secrets() {
        let mut config = BackendConfig::new(Url::parse("https://store.example.com").unwrap());
        config.app_key = Some("public_app_key".to_string());
        config.app_token = Some(SecretString::from("super_secret_app_token"));
        config.auth_token = Some(SecretString::from("super_secret_session"));

        let debug_output = format!("{config:?}");

        assert!(debug_output.contains("store.example.com"));
        assert!(debug_output.contains("public_app_key"));
        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("super_secret_app_token"));
        assert!(!debug_output.contains("super_secret_session"));
    }
}
