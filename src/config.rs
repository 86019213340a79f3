use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};

/// Content type recorded when the archive omits one.
pub const FALLBACK_CONTENT_TYPE: &str = "image/png";

/// A progress event is emitted every time this many fetches have completed.
pub const PROGRESS_INTERVAL: usize = 100;

/// Runs with fewer identifiers than this use `SMALL_RUN_CONCURRENCY`.
pub const SMALL_RUN_THRESHOLD: usize = 100;

/// Runs with more identifiers than this use `LARGE_RUN_CONCURRENCY`.
pub const LARGE_RUN_THRESHOLD: usize = 1000;

pub const SMALL_RUN_CONCURRENCY: usize = 25;
pub const MEDIUM_RUN_CONCURRENCY: usize = 50;
pub const LARGE_RUN_CONCURRENCY: usize = 100;

/// Idle keep-alive connections held per archive host.
pub const POOL_MAX_IDLE_PER_HOST: usize = 100;

/// How long an idle archive connection is kept before being closed.
pub const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(120);

/// `Cache-Control` sent with single-instance preview passthrough responses.
pub const PREVIEW_CACHE_CONTROL: &str = "public, max-age=3600";

const SECONDS_PER_HOUR: u64 = 60 * 60;

/// Top-level configuration for the proxy service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Base URL of the archive REST API, without a trailing slash.
    pub archive_url: String,
    /// Pre-encoded basic auth credentials sent as `Authorization: Basic <token>`.
    pub auth_token: String,
    /// Port the HTTP surface listens on.
    pub port: u16,
    /// Lifetime of a cached study aggregate.
    pub cache_ttl_hours: u64,
    /// Per-request timeout enforced by the archive client.
    pub request_timeout_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            archive_url: "http://localhost:8042".to_string(),
            auth_token: String::new(),
            port: 8080,
            cache_ttl_hours: 24,
            request_timeout_secs: 120,
        }
    }
}

impl ServiceConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    ///
    /// Recognised keys: `ORTHANC_URL`, `ORTHANC_TOKEN` (required), `PORT`,
    /// `CACHE_TTL_HOURS` and `FETCH_TIMEOUT_SECS`. Blank values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(url) = get("ORTHANC_URL") {
            config.archive_url = url.trim().trim_end_matches('/').to_string();
        }

        config.auth_token = get("ORTHANC_TOKEN")
            .ok_or_else(|| anyhow!("ORTHANC_TOKEN environment variable must be set"))?;

        if let Some(port) = get("PORT") {
            config.port = port
                .trim()
                .parse()
                .with_context(|| format!("invalid PORT: {}", port))?;
        }
        if let Some(hours) = get("CACHE_TTL_HOURS") {
            config.cache_ttl_hours = hours
                .trim()
                .parse()
                .with_context(|| format!("invalid CACHE_TTL_HOURS: {}", hours))?;
            if config.cache_ttl_hours.checked_mul(SECONDS_PER_HOUR).is_none() {
                bail!("CACHE_TTL_HOURS too large: {}", hours.trim());
            }
        }
        if let Some(secs) = get("FETCH_TIMEOUT_SECS") {
            config.request_timeout_secs = secs
                .trim()
                .parse()
                .with_context(|| format!("invalid FETCH_TIMEOUT_SECS: {}", secs))?;
        }

        Ok(config)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_hours.saturating_mul(SECONDS_PER_HOUR))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
