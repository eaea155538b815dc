//! HTTP routes and handlers

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode, Uri},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, error};
use url::Url;

use crate::middleware::consent_middleware;
use crate::proxy::AppState;

/// Headers that describe one connection and are not forwarded
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

pub fn create_router(state: AppState) -> Router {
    let site = Router::new()
        .fallback(forward)
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state.pipelines),
            consent_middleware,
        ))
        .with_state(state.clone());

    Router::new()
        .route("/health", get(health_check))
        .route("/health/stats", get(stats))
        .route("/metrics", get(metrics))
        .fallback_service(site)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> Response {
    if crate::is_shutting_down() {
        (StatusCode::SERVICE_UNAVAILABLE, "Shutting down").into_response()
    } else {
        "OK".into_response()
    }
}

async fn stats(State(state): State<AppState>) -> Json<serde_json::Value> {
    let pipeline = state.pipelines.current();
    let snapshot = state.pipelines.metrics().snapshot();

    Json(json!({
        "rules": pipeline.rules().len(),
        "version_hash": pipeline.oracle().version_hash(),
        "intercept_rate": snapshot.intercept_rate(),
        "avg_latency_us": snapshot.avg_latency_us(),
        "elements_blocked": snapshot.total_blocked(),
        "metrics": snapshot,
    }))
}

async fn metrics(State(state): State<AppState>) -> String {
    state.metrics_handle.render()
}

/// Forward a request to the upstream site
async fn forward(State(state): State<AppState>, request: Request) -> Result<Response, AppError> {
    let (parts, body) = request.into_parts();
    let url = upstream_url(&state.backend, &parts.uri)?;
    debug!(method = %parts.method, url = %url, "Forwarding request");

    let body = axum::body::to_bytes(body, state.config.blocking.max_body_bytes)
        .await
        .map_err(|e| AppError::InvalidRequest(format!("Request body rejected: {e}")))?;

    let mut upstream = state
        .http_client
        .request(parts.method.clone(), url)
        .body(body);

    for (name, value) in parts.headers.iter() {
        if forwardable(name) && *name != header::HOST && *name != header::ACCEPT_ENCODING {
            upstream = upstream.header(name, value);
        }
    }
    if let Some(host) = parts.headers.get(header::HOST) {
        upstream = upstream.header("x-forwarded-host", host);
    }

    let response = upstream.send().await.map_err(|e| {
        error!(error = %e, "Upstream request failed");
        AppError::Upstream(e.to_string())
    })?;

    let mut headers = HeaderMap::new();
    for (name, value) in response.headers().iter() {
        if forwardable(name) {
            headers.append(name.clone(), value.clone());
        }
    }

    let status = response.status();
    let mut reply = Response::new(Body::from_stream(response.bytes_stream()));
    *reply.status_mut() = status;
    *reply.headers_mut() = headers;
    Ok(reply)
}

/// Upstream URL for a request path, keeping any base path of the upstream
fn upstream_url(backend: &Url, uri: &Uri) -> Result<Url, AppError> {
    let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    let base = backend.as_str().trim_end_matches('/');
    Url::parse(&format!("{base}{path_and_query}"))
        .map_err(|e| AppError::InvalidRequest(format!("Invalid request path: {e}")))
}

fn forwardable(name: &HeaderName) -> bool {
    !HOP_BY_HOP.contains(&name.as_str())
}

/// Error handling
#[derive(Debug)]
pub enum AppError {
    InvalidRequest(String),
    Upstream(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::InvalidRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Upstream(msg) => (StatusCode::BAD_GATEWAY, msg),
        };

        let mut response = (status, message).into_response();
        response.headers_mut().insert(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        );
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_url_keeps_base_path() {
        let backend = Url::parse("https://www.example.org/site/").unwrap();
        let uri: Uri = "/blog/post?p=1".parse().unwrap();
        assert_eq!(
            upstream_url(&backend, &uri).unwrap().as_str(),
            "https://www.example.org/site/blog/post?p=1"
        );

        let root = Url::parse("https://www.example.org").unwrap();
        let uri: Uri = "/".parse().unwrap();
        assert_eq!(upstream_url(&root, &uri).unwrap().as_str(), "https://www.example.org/");
    }

    #[test]
    fn test_hop_by_hop_headers_dropped() {
        assert!(!forwardable(&header::CONNECTION));
        assert!(!forwardable(&header::TRANSFER_ENCODING));
        assert!(forwardable(&header::SET_COOKIE));
        assert!(forwardable(&header::CONTENT_TYPE));
    }
}
