//! Client configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Optional
//! - `DESKLINE_API_URL` - GraphQL endpoint (default: `http://localhost:3000/graphql`)
//! - `DESKLINE_PAGE_URL` - Origin of the hosting context; `https` origins mark
//!   stored credentials transport-restricted (default: `http://localhost:5173`)
//! - `DESKLINE_STATE_DIR` - Directory for the file-backed durable store
//!   (default: `.deskline`)
//! - `DESKLINE_REVALIDATE_DEBOUNCE_MS` - Minimum gap between focus/visibility
//!   revalidations (default: 2000)
//! - `DESKLINE_CACHE_TTL_SECS` - Read-model cache TTL (default: 300)
//! - `SENTRY_DSN` - Sentry error tracking DSN

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use url::Url;

pub const DEFAULT_API_URL: &str = "http://localhost:3000/graphql";
pub const DEFAULT_PAGE_URL: &str = "http://localhost:5173";
pub const DEFAULT_STATE_DIR: &str = ".deskline";
pub const DEFAULT_REVALIDATE_DEBOUNCE_MS: u64 = 2000;
pub const DEFAULT_CACHE_TTL_SECS: u64 = 300;

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

/// Deskline client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// GraphQL endpoint of the helpdesk API
    pub api_url: String,
    /// Origin of the context hosting this client
    pub page_url: String,
    /// Directory backing the file store
    pub state_dir: PathBuf,
    /// Debounce window for focus and visibility revalidation
    pub revalidate_debounce: Duration,
    /// Time-to-live of cached read-models
    pub cache_ttl: Duration,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
}

impl ClientConfig {
    /// Configuration with defaults for everything but the endpoint.
    #[must_use]
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            page_url: DEFAULT_PAGE_URL.to_string(),
            state_dir: PathBuf::from(DEFAULT_STATE_DIR),
            revalidate_debounce: Duration::from_millis(DEFAULT_REVALIDATE_DEBOUNCE_MS),
            cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            sentry_dsn: None,
        }
    }

    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is set but cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let api_url = get_env_or_default("DESKLINE_API_URL", DEFAULT_API_URL);
        if api_url.trim().is_empty() {
            return Err(ConfigError::MissingEnvVar("DESKLINE_API_URL".to_string()));
        }
        validate_url("DESKLINE_API_URL", &api_url)?;
        let page_url = get_env_or_default("DESKLINE_PAGE_URL", DEFAULT_PAGE_URL);
        validate_url("DESKLINE_PAGE_URL", &page_url)?;

        let state_dir = PathBuf::from(get_env_or_default("DESKLINE_STATE_DIR", DEFAULT_STATE_DIR));
        let debounce_ms = parse_u64(
            "DESKLINE_REVALIDATE_DEBOUNCE_MS",
            &get_env_or_default(
                "DESKLINE_REVALIDATE_DEBOUNCE_MS",
                &DEFAULT_REVALIDATE_DEBOUNCE_MS.to_string(),
            ),
        )?;
        let cache_ttl_secs = parse_u64(
            "DESKLINE_CACHE_TTL_SECS",
            &get_env_or_default("DESKLINE_CACHE_TTL_SECS", &DEFAULT_CACHE_TTL_SECS.to_string()),
        )?;

        Ok(Self {
            api_url,
            page_url,
            state_dir,
            revalidate_debounce: Duration::from_millis(debounce_ms),
            cache_ttl: Duration::from_secs(cache_ttl_secs),
            sentry_dsn: get_optional_env("SENTRY_DSN"),
        })
    }

    #[must_use]
    pub fn with_page_url(mut self, page_url: impl Into<String>) -> Self {
        self.page_url = page_url.into();
        self
    }

    #[must_use]
    pub fn with_state_dir(mut self, state_dir: impl Into<PathBuf>) -> Self {
        self.state_dir = state_dir.into();
        self
    }

    #[must_use]
    pub const fn with_revalidate_debounce(mut self, debounce: Duration) -> Self {
        self.revalidate_debounce = debounce;
        self
    }

    #[must_use]
    pub const fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Whether the hosting context is served over encrypted transport.
    #[must_use]
    pub fn is_secure_context(&self) -> bool {
        self.page_url.starts_with("https://")
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(DEFAULT_API_URL)
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get an optional environment variable.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.is_empty())
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}

fn validate_url(key: &str, value: &str) -> Result<(), ConfigError> {
    Url::parse(value)
        .map(|_| ())
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}
