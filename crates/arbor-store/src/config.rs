//! Remote store connection settings.

use std::time::Duration;

use arbor_core::defaults;
use arbor_core::{Error, Result};

/// Store URL variable.
pub const ENV_URL: &str = "SUPABASE_URL";
/// Public (anon) key variable.
pub const ENV_ANON_KEY: &str = "SUPABASE_ANON_KEY";
/// Service-role key variable; preferred over the anon key when present.
pub const ENV_SERVICE_ROLE_KEY: &str = "SUPABASE_SERVICE_ROLE_KEY";

/// Configuration for [`crate::RestStore`].
#[derive(Clone)]
pub struct StoreConfig {
    /// Base URL of the store, without the REST path.
    pub base_url: String,
    /// Key sent as `apikey` and bearer token.
    pub api_key: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Retries for transient failures on idempotent requests.
    pub max_retries: u32,
    /// Initial retry backoff in milliseconds.
    pub retry_backoff_ms: u64,
    /// Rows per page when listing children of a parent.
    pub page_size: usize,
}

impl std::fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("timeout_secs", &self.timeout_secs)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("page_size", &self.page_size)
            .finish()
    }
}

impl StoreConfig {
    /// Create a config with default tuning for the given endpoint and key.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            timeout_secs: defaults::STORE_TIMEOUT_SECS,
            max_retries: defaults::STORE_MAX_RETRIES,
            retry_backoff_ms: defaults::STORE_RETRY_BACKOFF_MS,
            page_size: defaults::STORE_PAGE_SIZE,
        }
    }

    /// Create config from environment variables.
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `SUPABASE_URL` | required | Store endpoint |
    /// | `SUPABASE_SERVICE_ROLE_KEY` | - | Preferred access key |
    /// | `SUPABASE_ANON_KEY` | - | Fallback access key |
    /// | `ARBOR_TIMEOUT_SECS` | `30` | Per-request timeout |
    /// | `ARBOR_MAX_RETRIES` | `2` | Retries on transient failures |
    /// | `ARBOR_PAGE_SIZE` | `1000` | Listing page size |
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`StoreConfig::from_env`] with an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let base_url = non_empty(ENV_URL)
            .ok_or_else(|| Error::Config(format!("{} is not set", ENV_URL)))?;
        let api_key = non_empty(ENV_SERVICE_ROLE_KEY)
            .or_else(|| non_empty(ENV_ANON_KEY))
            .ok_or_else(|| {
                Error::Config(format!(
                    "neither {} nor {} is set",
                    ENV_SERVICE_ROLE_KEY, ENV_ANON_KEY
                ))
            })?;

        let mut config = Self::new(base_url, api_key);

        if let Some(v) = non_empty("ARBOR_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            config.timeout_secs = v;
        }
        if let Some(v) = non_empty("ARBOR_MAX_RETRIES").and_then(|v| v.parse().ok()) {
            config.max_retries = v;
        }
        if let Some(v) = non_empty("ARBOR_PAGE_SIZE").and_then(|v| v.parse::<usize>().ok()) {
            config.page_size = v.max(1);
        }

        Ok(config)
    }

    /// Set the request timeout.
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Set the retry count.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set the initial retry backoff.
    pub fn with_retry_backoff_ms(mut self, ms: u64) -> Self {
        self.retry_backoff_ms = ms;
        self
    }

    /// Set the listing page size.
    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = size.max(1);
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Backoff before retry `attempt` (0-based), doubling each time.
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(1u64 << attempt.min(16)))
    }
}
