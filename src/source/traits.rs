use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Raw bytes of one resource as returned by the archive.
pub struct FetchedResource {
    pub payload: Bytes,
    pub content_type: String,
}

/// One series of a study, as listed by the archive.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeriesListing {
    #[serde(rename = "ID", default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(rename = "Instances", default)]
    pub instances: Vec<String>,
}

#[async_trait]
pub trait ArchiveSource: Send + Sync {
    /// Fetch the rendered preview of a single instance.
    async fn fetch_resource(&self, identifier: &str) -> Result<FetchedResource>;
    /// List the series of a study together with their instance identifiers.
    async fn list_series(&self, study_id: &str) -> Result<Vec<SeriesListing>>;
}
