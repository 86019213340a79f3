// Axum request handlers: translate client HTTP requests into study service calls.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::{rejection::JsonRejection, Path, Query, Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{FALLBACK_CONTENT_TYPE, PREVIEW_CACHE_CONTROL};
use crate::engine::service::StudyService;

pub type SharedService = Arc<StudyService>;

pub struct ProxyServer {
    local_addr: SocketAddr,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ProxyServer {
    /// Bind `addr` and start serving in the background. Port 0 picks a free port.
    pub async fn start(service: SharedService, addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        let app = router(service);

        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
            {
                error!("proxy server stopped with error: {}", e);
            }
        });

        info!("proxy server listening on {}", local_addr);
        Ok(Self {
            local_addr,
            shutdown_tx: Some(shutdown_tx),
            task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Build a URL for `path` on this server.
    pub fn url(&self, path: &str) -> String {
        format!("http://{}/{}", self.local_addr, path.trim_start_matches('/'))
    }

    /// Stop accepting connections and wait for in-flight requests to finish.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Err(e) = self.task.await {
            warn!("proxy server task ended abnormally: {}", e);
        }
    }
}

/// Build the router for the proxy surface.
pub fn router(service: SharedService) -> Router {
    Router::new()
        .route("/fetch-study", post(fetch_study_handler))
        .route("/fetch-instances", post(fetch_instances_handler))
        .route("/instance-preview", get(instance_preview_handler))
        .route("/study-series/{study_id}", get(study_series_handler))
        .route("/health", get(health_handler))
        .route("/cache-stats", get(cache_stats_handler))
        .route("/clear-cache", post(clear_cache_handler))
        .layer(middleware::from_fn(cors_layer))
        .with_state(service)
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

/// Answer preflight requests and attach permissive CORS headers to every response.
async fn cors_layer(req: Request, next: Next) -> Response {
    let mut resp = if req.method() == Method::OPTIONS {
        StatusCode::OK.into_response()
    } else {
        next.run(req).await
    };

    let headers = resp.headers_mut();
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("POST, GET, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(
            "Accept, Content-Type, Content-Length, Accept-Encoding, X-CSRF-Token, Authorization",
        ),
    );
    resp
}

#[derive(Debug, Deserialize)]
struct FetchStudyRequest {
    #[serde(rename = "studyId", default)]
    study_id: String,
}

/// Explicit identifier lists arrive either wrapped or as a bare JSON array.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(untagged)]
enum FetchInstancesRequest {
    Wrapped {
        #[serde(rename = "instanceIds")]
        instance_ids: Vec<String>,
        #[serde(rename = "subjectId", default)]
        subject_id: String,
    },
    Bare(Vec<String>),
}

impl FetchInstancesRequest {
    fn into_parts(self) -> (String, Vec<String>) {
        match self {
            FetchInstancesRequest::Wrapped {
                instance_ids,
                subject_id,
            } => (subject_id, instance_ids),
            FetchInstancesRequest::Bare(ids) => (String::new(), ids),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PreviewQuery {
    #[serde(rename = "instanceId")]
    instance_id: Option<String>,
}

/// POST /fetch-study: aggregate every preview of a study, served from cache when fresh.
async fn fetch_study_handler(
    State(service): State<SharedService>,
    body: Result<Json<FetchStudyRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match body {
        Ok(body) => body,
        Err(e) => {
            warn!("error decoding fetch-study request: {}", e);
            return error_response(StatusCode::BAD_REQUEST, "Invalid JSON");
        }
    };

    let study_id = request.study_id.trim().to_string();
    if study_id.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "studyId required");
    }
    info!("received request for study {}", study_id);

    match service.fetch_study(&study_id).await {
        Ok(fetch) => {
            let mut headers = HeaderMap::new();
            headers.insert(
                HeaderName::from_static("x-cache-status"),
                HeaderValue::from_static(fetch.cache_status.as_str()),
            );
            (StatusCode::OK, headers, Json(fetch.result)).into_response()
        }
        Err(e) => {
            error!("error processing study {}: {:#}", study_id, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e))
        }
    }
}

/// POST /fetch-instances: aggregate an explicit list of previews. Never cached.
async fn fetch_instances_handler(
    State(service): State<SharedService>,
    body: Result<Json<FetchInstancesRequest>, JsonRejection>,
) -> Response {
    let (subject_id, identifiers) = match body {
        Ok(Json(request)) => request.into_parts(),
        Err(e) => {
            warn!("error decoding fetch-instances request: {}", e);
            return error_response(StatusCode::BAD_REQUEST, "Array of instance IDs required");
        }
    };

    if identifiers.is_empty() || identifiers.iter().any(|id| id.trim().is_empty()) {
        return error_response(StatusCode::BAD_REQUEST, "Array of instance IDs required");
    }

    debug!(
        "fetch-instances subject={} count={}",
        subject_id,
        identifiers.len()
    );
    let result = service.fetch_instances(&subject_id, identifiers).await;
    (StatusCode::OK, Json(result)).into_response()
}

/// GET /instance-preview?instanceId=: raw preview passthrough.
async fn instance_preview_handler(
    State(service): State<SharedService>,
    Query(query): Query<PreviewQuery>,
) -> Response {
    let instance_id = match query.instance_id.filter(|id| !id.trim().is_empty()) {
        Some(id) => id,
        None => return error_response(StatusCode::BAD_REQUEST, "Instance ID required"),
    };

    match service.fetch_preview(&instance_id).await {
        Ok(fetched) => {
            let content_type = HeaderValue::from_str(&fetched.content_type)
                .unwrap_or_else(|_| HeaderValue::from_static(FALLBACK_CONTENT_TYPE));
            let mut headers = HeaderMap::new();
            headers.insert(header::CONTENT_TYPE, content_type);
            headers.insert(
                header::CACHE_CONTROL,
                HeaderValue::from_static(PREVIEW_CACHE_CONTROL),
            );
            (StatusCode::OK, headers, fetched.payload).into_response()
        }
        Err(e) => {
            error!("error fetching preview {}: {}", instance_id, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to fetch image")
        }
    }
}

/// GET /study-series/{study_id}: light listing of a study's series.
async fn study_series_handler(
    State(service): State<SharedService>,
    Path(study_id): Path<String>,
) -> Response {
    match service.list_series(&study_id).await {
        Ok(series) => {
            let total = series.len();
            Json(json!({ "series": series, "totalSeries": total })).into_response()
        }
        Err(e) => {
            error!("error listing series for study {}: {}", study_id, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to list series")
        }
    }
}

async fn health_handler() -> Response {
    Json(json!({ "status": "healthy" })).into_response()
}

async fn cache_stats_handler(State(service): State<SharedService>) -> Response {
    let stats = service.cache_stats();
    let ttl_hours = service.cache().ttl().as_secs() / 3600;
    Json(json!({
        "total_entries": stats.total_entries,
        "valid_entries": stats.valid_entries,
        "cache_ttl_hours": ttl_hours,
    }))
    .into_response()
}

async fn clear_cache_handler(State(service): State<SharedService>) -> Response {
    service.clear_cache();
    Json(json!({ "status": "cache cleared" })).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_wrapped_instances_request() {
        let req: FetchInstancesRequest =
            serde_json::from_str(r#"{"instanceIds": ["a", "b"], "subjectId": "s1"}"#).unwrap();
        assert_eq!(req.into_parts(), ("s1".to_string(), vec!["a".to_string(), "b".to_string()]));
    }

    #[test]
    fn test_parse_wrapped_without_subject() {
        let req: FetchInstancesRequest =
            serde_json::from_str(r#"{"instanceIds": ["a"]}"#).unwrap();
        assert_eq!(req.into_parts(), (String::new(), vec!["a".to_string()]));
    }

    #[test]
    fn test_parse_bare_array() {
        let req: FetchInstancesRequest = serde_json::from_str(r#"["x", "y"]"#).unwrap();
        assert_eq!(
            req,
            FetchInstancesRequest::Bare(vec!["x".to_string(), "y".to_string()])
        );
    }

    #[test]
    fn test_parse_rejects_other_shapes() {
        assert!(serde_json::from_str::<FetchInstancesRequest>(r#"{"ids": []}"#).is_err());
        assert!(serde_json::from_str::<FetchInstancesRequest>(r#""a""#).is_err());
    }
}
