//! Configuration management for the client.

use fieldsync_engine::RetryPolicy;
use std::env;
use std::time::Duration;

const DEFAULT_API_BASE_URL: &str = "http://localhost:8000";
const DEFAULT_DATABASE_URL: &str = "sqlite://fieldsync.db?mode=rwc";

/// Client configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Backend base URL, without the route prefix
    pub api_base_url: String,
    /// Application key sent as `X-API-Key`
    pub api_key: Option<String>,
    /// SQLite connection URL of the local store
    pub database_url: String,
    /// Upper bound for a single HTTP attempt
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    /// Bearer token for the static session (CLI use)
    pub auth_token: Option<String>,
    /// User id sent as `X-User-ID`
    pub user_id: Option<String>,
}

impl ClientConfig {
    /// Configuration with defaults for everything except the backend URL.
    pub fn new(api_base_url: impl Into<String>) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            api_key: None,
            database_url: DEFAULT_DATABASE_URL.to_string(),
            request_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            auth_token: None,
            user_id: None,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_base_url = env::var("API_BASE_URL").unwrap_or_else(|_| DEFAULT_API_BASE_URL.to_string());
        if !api_base_url.starts_with("http://") && !api_base_url.starts_with("https://") {
            return Err(ConfigError::InvalidBaseUrl(api_base_url));
        }

        let database_url = env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string());

        let timeout_secs: u64 = parse_var("REQUEST_TIMEOUT_SECS", 30)?;
        let max_attempts: u32 = parse_var("RETRY_MAX_ATTEMPTS", 3)?;
        let base_delay_ms: u64 = parse_var("RETRY_BASE_DELAY_MS", 500)?;

        Ok(Self {
            api_base_url,
            api_key: non_empty_var("APP_API_KEY"),
            database_url,
            request_timeout: Duration::from_secs(timeout_secs),
            retry: RetryPolicy::new(max_attempts, Duration::from_millis(base_delay_ms)),
            auth_token: non_empty_var("AUTH_TOKEN"),
            user_id: non_empty_var("USER_ID"),
        })
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) => value.trim().parse().map_err(|_| ConfigError::InvalidNumber { name, value }),
        Err(_) => Ok(default),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("API_BASE_URL must be an http(s) URL, got {0:?}")]
    InvalidBaseUrl(String),

    #[error("Invalid {name} value: {value:?}")]
    InvalidNumber { name: &'static str, value: String },

    #[error("HTTP client could not be built: {0}")]
    HttpClient(String),
}
