// Fetch outcomes: one per identifier, aggregated once per orchestration run.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use serde::{Serialize, Serializer};

use crate::config::FALLBACK_CONTENT_TYPE;

/// Outcome of fetching a single resource. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceResult {
    #[serde(rename = "instanceId")]
    identifier: String,
    #[serde(rename = "success")]
    succeeded: bool,
    #[serde(
        rename = "data",
        serialize_with = "encode_payload",
        skip_serializing_if = "Option::is_none"
    )]
    payload: Option<Bytes>,
    #[serde(rename = "contentType")]
    content_type: String,
    #[serde(rename = "error", skip_serializing_if = "Option::is_none")]
    error_message: Option<String>,
}

impl ResourceResult {
    /// A successful fetch. An empty `content_type` falls back to `image/png`.
    pub fn success(identifier: impl Into<String>, payload: Bytes, content_type: &str) -> Self {
        let content_type = if content_type.trim().is_empty() {
            FALLBACK_CONTENT_TYPE.to_string()
        } else {
            content_type.to_string()
        };
        Self {
            identifier: identifier.into(),
            succeeded: true,
            payload: Some(payload),
            content_type,
            error_message: None,
        }
    }

    pub fn failure(identifier: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            succeeded: false,
            payload: None,
            content_type: FALLBACK_CONTENT_TYPE.to_string(),
            error_message: Some(message.into()),
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn succeeded(&self) -> bool {
        self.succeeded
    }

    pub fn payload(&self) -> Option<&Bytes> {
        self.payload.as_ref()
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }
}

fn encode_payload<S>(payload: &Option<Bytes>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match payload {
        Some(bytes) => serializer.serialize_str(&STANDARD.encode(bytes)),
        None => serializer.serialize_none(),
    }
}

/// Aggregate of one orchestration run.
///
/// Only successful results are kept in `items`; failures are counted.
/// `succeeded + failed == total_requested` and `items.len() == succeeded`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateResult {
    #[serde(rename = "study_id")]
    subject_id: String,
    #[serde(rename = "images")]
    items: Vec<ResourceResult>,
    #[serde(rename = "total_instances")]
    total_requested: usize,
    #[serde(rename = "successful")]
    succeeded: usize,
    failed: usize,
    #[serde(rename = "processing_time")]
    elapsed_seconds: f64,
}

impl AggregateResult {
    /// Partition ordered per-identifier results into the ordered successes and a failure count.
    pub fn from_results(
        subject_id: impl Into<String>,
        results: Vec<ResourceResult>,
        elapsed_seconds: f64,
    ) -> Self {
        let total_requested = results.len();
        let items: Vec<ResourceResult> = results.into_iter().filter(|r| r.succeeded).collect();
        let succeeded = items.len();
        Self {
            subject_id: subject_id.into(),
            items,
            total_requested,
            succeeded,
            failed: total_requested - succeeded,
            elapsed_seconds: elapsed_seconds.max(0.0),
        }
    }

    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    pub fn items(&self) -> &[ResourceResult] {
        &self.items
    }

    pub fn total_requested(&self) -> usize {
        self.total_requested
    }

    pub fn succeeded_count(&self) -> usize {
        self.succeeded
    }

    pub fn failed_count(&self) -> usize {
        self.failed
    }

    pub fn elapsed_seconds(&self) -> f64 {
        self.elapsed_seconds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_content_type_falls_back() {
        let r = ResourceResult::success("a", Bytes::from_static(b"x"), "");
        assert_eq!(r.content_type(), "image/png");
        let r = ResourceResult::success("a", Bytes::from_static(b"x"), "image/jpeg");
        assert_eq!(r.content_type(), "image/jpeg");
    }

    #[test]
    fn test_partition_keeps_order_and_counts() {
        let results = vec![
            ResourceResult::success("a", Bytes::from_static(b"1"), "image/png"),
            ResourceResult::failure("b", "HTTP 404"),
            ResourceResult::success("c", Bytes::from_static(b"3"), "image/png"),
            ResourceResult::failure("d", "connection refused"),
        ];
        let agg = AggregateResult::from_results("study", results, 0.5);
        assert_eq!(agg.total_requested(), 4);
        assert_eq!(agg.succeeded_count(), 2);
        assert_eq!(agg.failed_count(), 2);
        let ids: Vec<&str> = agg.items().iter().map(|r| r.identifier()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn test_serialized_shape() {
        let results = vec![ResourceResult::success(
            "inst-1",
            Bytes::from_static(b"hello"),
            "image/png",
        )];
        let agg = AggregateResult::from_results("s1", results, 1.25);
        let json = serde_json::to_value(&agg).unwrap();

        assert_eq!(json["study_id"], "s1");
        assert_eq!(json["total_instances"], 1);
        assert_eq!(json["successful"], 1);
        assert_eq!(json["failed"], 0);
        assert_eq!(json["processing_time"], 1.25);

        let image = &json["images"][0];
        assert_eq!(image["instanceId"], "inst-1");
        assert_eq!(image["success"], true);
        assert_eq!(image["data"], "aGVsbG8=");
        assert_eq!(image["contentType"], "image/png");
        assert!(image.get("error").is_none());
    }

    #[test]
    fn test_failure_serializes_without_data() {
        let json = serde_json::to_value(ResourceResult::failure("x", "HTTP 500")).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "HTTP 500");
        assert_eq!(
            ResourceResult::failure("x", "HTTP 500").error_message(),
            Some("HTTP 500")
        );
        assert!(json.get("data").is_none());
    }
}
