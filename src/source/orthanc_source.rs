use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::{header, Client, RequestBuilder, Url};
use tracing::{debug, warn};

use super::traits::{ArchiveSource, FetchedResource, SeriesListing};
use crate::config::{
    ServiceConfig, FALLBACK_CONTENT_TYPE, POOL_IDLE_TIMEOUT, POOL_MAX_IDLE_PER_HOST,
};

/// Archive client speaking the Orthanc REST dialect with basic auth.
pub struct OrthancSource {
    client: Client,
    base_url: Url,
    auth_token: String,
}

impl OrthancSource {
    pub fn new(
        base_url: impl Into<String>,
        auth_token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let base_url = base_url.into();
        let parsed = Url::parse(base_url.trim_end_matches('/'))
            .with_context(|| format!("invalid archive url: {}", base_url))?;
        if parsed.cannot_be_a_base() {
            bail!("archive url cannot carry a path: {}", base_url);
        }

        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
            .pool_idle_timeout(POOL_IDLE_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url: parsed,
            auth_token: auth_token.into(),
        })
    }

    pub fn from_config(config: &ServiceConfig) -> Result<Self> {
        Self::new(
            config.archive_url.clone(),
            config.auth_token.clone(),
            config.request_timeout(),
        )
    }

    /// Build an authenticated GET for the archive path made of `segments`.
    ///
    /// Each segment is percent-encoded on its own, so an identifier can never
    /// change which endpoint is addressed.
    fn build_request(&self, segments: &[&str]) -> Result<RequestBuilder> {
        if let Some(bad) = segments.iter().find(|s| matches!(**s, "" | "." | "..")) {
            bail!("invalid path segment: {:?}", bad);
        }

        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("archive url cannot carry a path: {}", self.base_url))?
            .pop_if_empty()
            .extend(segments);

        Ok(self
            .client
            .get(url)
            .header(header::AUTHORIZATION, format!("Basic {}", self.auth_token)))
    }
}

#[async_trait]
impl ArchiveSource for OrthancSource {
    async fn fetch_resource(&self, identifier: &str) -> Result<FetchedResource> {
        let resp = self
            .build_request(&["instances", identifier, "preview"])?
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            debug!("preview fetch failed id={} status={}", identifier, status.as_u16());
            return Err(anyhow!("HTTP {}", status.as_u16()));
        }

        let content_type = resp
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .unwrap_or(FALLBACK_CONTENT_TYPE)
            .to_string();

        let payload = resp.bytes().await?;
        Ok(FetchedResource {
            payload,
            content_type,
        })
    }

    async fn list_series(&self, study_id: &str) -> Result<Vec<SeriesListing>> {
        let resp = self
            .build_request(&["studies", study_id, "series"])?
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            warn!("series listing failed study={} status={}", study_id, status.as_u16());
            return Err(anyhow!("failed to fetch series: {}", status.as_u16()));
        }

        let body = resp.bytes().await?;
        let series: Vec<SeriesListing> = serde_json::from_slice(&body)
            .map_err(|e| anyhow!("invalid series listing for study {}: {}", study_id, e))?;
        Ok(series)
    }
}
