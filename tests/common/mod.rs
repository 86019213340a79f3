// Fake archive shared by the integration tests.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use tokio::net::TcpListener;

pub const TOKEN: &str = "c2VjcmV0OnNlY3JldA==";

#[derive(Default)]
pub struct ArchiveCalls {
    pub previews: AtomicUsize,
    pub listings: AtomicUsize,
}

impl ArchiveCalls {
    pub fn previews(&self) -> usize {
        self.previews.load(Ordering::SeqCst)
    }

    pub fn listings(&self) -> usize {
        self.listings.load(Ordering::SeqCst)
    }
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map_or(false, |v| v == format!("Basic {}", TOKEN))
}

/// `missing-*` instances answer 404, `plain` answers without a content type,
/// everything else is a JPEG whose body is `img:<id>`.
async fn preview(
    State(calls): State<Arc<ArchiveCalls>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    calls.previews.fetch_add(1, Ordering::SeqCst);
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if id.starts_with("missing") {
        return StatusCode::NOT_FOUND.into_response();
    }
    let body = format!("img:{}", id);
    if id == "plain" {
        return Response::new(Body::from(body));
    }
    ([(header::CONTENT_TYPE, "image/jpeg")], body).into_response()
}

async fn series(
    State(calls): State<Arc<ArchiveCalls>>,
    Path(study): Path<String>,
    headers: HeaderMap,
) -> Response {
    calls.listings.fetch_add(1, Ordering::SeqCst);
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    match study.as_str() {
        "study-1" => Json(json!([
            { "ID": "series-a", "Instances": ["i1", "i2"] },
            { "ID": "series-b", "Instances": ["missing-1", "i3"] },
        ]))
        .into_response(),
        "empty" => Json(json!([])).into_response(),
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Start the fake archive on a random local port.
pub async fn start_archive() -> (SocketAddr, Arc<ArchiveCalls>) {
    let calls = Arc::new(ArchiveCalls::default());
    let app = Router::new()
        .route("/instances/{id}/preview", get(preview))
        .route("/studies/{study}/series", get(series))
        .with_state(Arc::clone(&calls));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, calls)
}
