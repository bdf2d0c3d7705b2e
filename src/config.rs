//! Client configuration.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};
use crate::transport::RetryPolicy;

/// Default API endpoint.
pub const DEFAULT_BASE_URL: &str = "https://api.klingai.com";

/// Configuration for a [`KlingClient`](crate::KlingClient).
///
/// Loaded from TOML, from `KLING_*` environment variables, or built in code.
///
/// # Example Configuration File
///
/// ```toml
/// api_key = "sk-..."
/// base_url = "https://api.klingai.com"
/// timeout_ms = 30000
/// max_retries = 3
/// callback_url = "https://hooks.example.com/kling"
/// callback_secret = "whsec-..."
/// ```
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use kling::ClientConfig;
///
/// let config = ClientConfig::from_toml(r#"
///     api_key = "test-key"
///     timeout_ms = 60000
/// "#).unwrap();
/// assert_eq!(config.timeout(), Duration::from_secs(60));
/// assert_eq!(config.max_retries, 3);
/// assert!(!format!("{config:?}").contains("test-key"));
/// ```
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Bearer credential.
    #[serde(default)]
    pub api_key: String,

    /// API base URL.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request timeout in milliseconds, `10_000..=120_000`.
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,

    /// Retries after a failed idempotent request, `0..=5`.
    #[serde(default = "default_retries")]
    pub max_retries: u32,

    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_ms: u64,

    /// Cap on a single retry delay, in milliseconds.
    #[serde(default = "default_retry_max_delay")]
    pub retry_max_delay_ms: u64,

    /// Cap on the summed retry delays of one call, in milliseconds.
    #[serde(default = "default_retry_max_total_wait")]
    pub retry_max_total_wait_ms: u64,

    /// Retry create calls too. Off by default: a retried create whose first
    /// attempt reached the server produces a second task.
    #[serde(default)]
    pub retry_non_idempotent: bool,

    /// Serve terminal tasks from the cache instead of polling again.
    #[serde(default = "default_true")]
    pub cache_terminal_tasks: bool,

    /// Most tasks kept in the task cache. Past it, the least recently
    /// observed terminal tasks are evicted first.
    #[serde(default = "default_task_cache_capacity")]
    pub task_cache_capacity: usize,

    /// Shared secret for callback signatures. Unsigned callbacks are
    /// rejected when set.
    #[serde(default)]
    pub callback_secret: Option<String>,

    /// Callback URL applied to requests that do not set one.
    #[serde(default)]
    pub callback_url: Option<String>,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_timeout() -> u64 {
    30_000 // 30 seconds
}

fn default_retries() -> u32 {
    3
}

fn default_retry_base_delay() -> u64 {
    1_000
}

fn default_retry_max_delay() -> u64 {
    10_000
}

fn default_retry_max_total_wait() -> u64 {
    30_000
}

fn default_task_cache_capacity() -> usize {
    crate::tasks::DEFAULT_CACHE_CAPACITY
}

fn default_true() -> bool {
    true
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_base_url(),
            timeout_ms: default_timeout(),
            max_retries: default_retries(),
            retry_base_delay_ms: default_retry_base_delay(),
            retry_max_delay_ms: default_retry_max_delay(),
            retry_max_total_wait_ms: default_retry_max_total_wait(),
            retry_non_idempotent: false,
            cache_terminal_tasks: true,
            task_cache_capacity: default_task_cache_capacity(),
            callback_secret: None,
            callback_url: None,
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("api_key", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .field("timeout_ms", &self.timeout_ms)
            .field("max_retries", &self.max_retries)
            .field("retry_base_delay_ms", &self.retry_base_delay_ms)
            .field("retry_max_delay_ms", &self.retry_max_delay_ms)
            .field("retry_max_total_wait_ms", &self.retry_max_total_wait_ms)
            .field("retry_non_idempotent", &self.retry_non_idempotent)
            .field("cache_terminal_tasks", &self.cache_terminal_tasks)
            .field("task_cache_capacity", &self.task_cache_capacity)
            .field(
                "callback_secret",
                &self.callback_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("callback_url", &self.callback_url)
            .finish()
    }
}

impl ClientConfig {
    /// Default configuration with the given credential.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            ..Self::default()
        }
    }

    /// Load and validate configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the environment.
    ///
    /// Reads `KLING_API_KEY` (required), `KLING_BASE_URL`, `KLING_TIMEOUT_MS`,
    /// `KLING_MAX_RETRIES`, `KLING_CALLBACK_SECRET` and `KLING_CALLBACK_URL`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let api_key = lookup("KLING_API_KEY")
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| Error::Config("KLING_API_KEY is not set".to_string()))?;
        let mut config = Self::new(api_key);

        if let Some(base_url) = lookup("KLING_BASE_URL") {
            config.base_url = base_url;
        }
        if let Some(timeout) = lookup("KLING_TIMEOUT_MS") {
            config.timeout_ms = parse_var("KLING_TIMEOUT_MS", &timeout)?;
        }
        if let Some(retries) = lookup("KLING_MAX_RETRIES") {
            config.max_retries = parse_var("KLING_MAX_RETRIES", &retries)?;
        }
        config.callback_secret = lookup("KLING_CALLBACK_SECRET");
        config.callback_url = lookup("KLING_CALLBACK_URL");

        config.validate()?;
        Ok(config)
    }

    /// Check every field against its allowed range.
    pub fn validate(&self) -> Result<()> {
        if self.api_key.trim().is_empty() {
            return Err(Error::Config("api_key must not be empty".to_string()));
        }
        check_http_url("base_url", &self.base_url)?;
        if !(10_000..=120_000).contains(&self.timeout_ms) {
            return Err(Error::Config(format!(
                "timeout_ms must be between 10000 and 120000 (got {})",
                self.timeout_ms
            )));
        }
        if self.max_retries > 5 {
            return Err(Error::Config(format!(
                "max_retries must be between 0 and 5 (got {})",
                self.max_retries
            )));
        }
        if self.retry_base_delay_ms > self.retry_max_delay_ms {
            return Err(Error::Config(
                "retry_base_delay_ms must not exceed retry_max_delay_ms".to_string(),
            ));
        }
        if self.task_cache_capacity == 0 {
            return Err(Error::Config("task_cache_capacity must be at least 1".to_string()));
        }
        if let Some(url) = &self.callback_url {
            check_http_url("callback_url", url)?;
        }
        if self.callback_secret.as_deref().is_some_and(|s| s.is_empty()) {
            return Err(Error::Config("callback_secret must not be empty".to_string()));
        }
        Ok(())
    }

    /// Per-request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Retry policy described by this configuration.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
            max_total_wait: Duration::from_millis(self.retry_max_total_wait_ms),
            retry_non_idempotent: self.retry_non_idempotent,
        }
    }

    /// Set the base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Set the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the retry budget.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set the task cache capacity.
    pub fn with_task_cache_capacity(mut self, capacity: usize) -> Self {
        self.task_cache_capacity = capacity;
        self
    }

    /// Set the callback signing secret.
    pub fn with_callback_secret(mut self, secret: impl Into<String>) -> Self {
        self.callback_secret = Some(secret.into());
        self
    }

    /// Set the default callback URL.
    pub fn with_callback_url(mut self, url: impl Into<String>) -> Self {
        self.callback_url = Some(url.into());
        self
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{name} is not a valid number: `{value}`")))
}

fn check_http_url(field: &str, value: &str) -> Result<()> {
    match Url::parse(value) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(()),
        Ok(url) => Err(Error::Config(format!(
            "{field} must use http or https (got `{}`)",
            url.scheme()
        ))),
        Err(e) => Err(Error::Config(format!("{field} is not a valid URL: {e}"))),
    }
}
