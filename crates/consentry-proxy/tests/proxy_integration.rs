//! Integration tests for the consent middleware and the proxy router

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    response::Html,
    routing::get,
    Json, Router,
};
use chrono::Utc;
use consentry_consent::{ConsentRecord, MemoryConsentStore};
use consentry_proxy::{
    middleware::consent_middleware, proxy::AppState, routes, PipelineCache, ProxyConfig,
};
use consentry_rules::{IframeReplacement, MatchType, Rule, RuleSet, RuleSource, StaticRuleSource};
use consentry_telemetry::MetricsCollector;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tower::ServiceExt;

const PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><script src="https://www.googletagmanager.com/gtag/js?id=G-1"></script></head>
<body>
<iframe src="https://www.youtube.com/embed/abc"></iframe>
<p>Welcome</p>
</body>
</html>"#;

fn rules() -> Vec<Rule> {
    vec![
        Rule::script(MatchType::Contains, "googletagmanager", "analytics"),
        Rule::iframe(
            MatchType::Contains,
            "youtube",
            "marketing",
            IframeReplacement::Placeholder {
                url: "/placeholder.jpg".into(),
            },
        ),
    ]
}

fn version_hash() -> String {
    RuleSet::new(rules()).version_hash(&ProxyConfig::default().categories)
}

fn store() -> MemoryConsentStore {
    MemoryConsentStore::from_records([ConsentRecord::new(
        "visitor-1",
        version_hash(),
        ["analytics", "marketing"].into_iter().collect(),
        Utc::now(),
        365,
    )])
}

fn pipelines(rules: Vec<Rule>) -> Arc<PipelineCache> {
    Arc::new(PipelineCache::new(
        Arc::new(StaticRuleSource::new(rules)),
        Arc::new(store()),
        Arc::new(ProxyConfig::default()),
        MetricsCollector::new(),
    ))
}

fn site(pipelines: Arc<PipelineCache>) -> Router {
    Router::new()
        .route("/", get(|| async { Html(PAGE) }))
        .route("/api", get(|| async { Json(serde_json::json!({ "html": PAGE })) }))
        .route("/wp-admin/edit.php", get(|| async { Html(PAGE) }))
        .layer(axum::middleware::from_fn_with_state(pipelines, consent_middleware))
}

async fn get_page(app: Router, uri: &str, cookie: Option<&str>) -> (axum::http::response::Parts, String) {
    let mut request = Request::builder().uri(uri);
    if let Some(cookie) = cookie {
        request = request.header(header::COOKIE, cookie);
    }
    let response = app
        .oneshot(request.body(Body::empty()).unwrap())
        .await
        .unwrap();

    let (parts, body) = response.into_parts();
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    (parts, String::from_utf8(bytes.to_vec()).unwrap())
}

#[tokio::test]
async fn test_page_rewritten_without_consent() {
    let cache = pipelines(rules());
    let (parts, body) = get_page(site(cache.clone()), "/", Some("_ga=GA1.1; PHPSESSID=abc")).await;

    assert_eq!(parts.status, StatusCode::OK);
    assert!(body.contains(r#"type="text/plain""#));
    assert!(body.contains(r#"data-cookiecategory="analytics""#));
    assert!(body.contains(r#"src="/placeholder.jpg""#));
    assert!(body.contains(r#"data-src="https://www.youtube.com/embed/abc""#));
    assert!(body.contains("dcc-iframe-placeholder"));
    assert!(body.contains("<p>Welcome</p>"));

    assert_eq!(
        parts.headers[header::CACHE_CONTROL],
        "no-store, no-cache, must-revalidate, max-age=0"
    );
    let expired: Vec<_> = parts.headers.get_all(header::SET_COOKIE).iter().collect();
    assert_eq!(expired.len(), 1);
    assert!(expired[0].to_str().unwrap().starts_with("_ga=;"));

    let snapshot = cache.metrics().snapshot();
    assert_eq!(snapshot.intercepted, 1);
    assert_eq!(snapshot.scripts_blocked, 1);
    assert_eq!(snapshot.iframes_blocked, 1);
}

#[tokio::test]
async fn test_valid_consent_served_unmodified() {
    let (parts, body) = get_page(site(pipelines(rules())), "/", Some("dcc_consent_id=visitor-1")).await;

    assert_eq!(body, PAGE);
    assert!(parts.headers.get(header::SET_COOKIE).is_none());
    assert!(parts.headers.get(header::PRAGMA).is_none());
}

#[tokio::test]
async fn test_malformed_consent_cookie_blocks() {
    let (_, body) = get_page(site(pipelines(rules())), "/", Some("cookie_consent=not-json")).await;
    assert_ne!(body, PAGE);
    assert!(body.contains("text/plain"));
}

#[tokio::test]
async fn test_empty_rules_pass_through() {
    let (_, body) = get_page(site(pipelines(Vec::new())), "/", None).await;
    assert_eq!(body, PAGE);
}

#[tokio::test]
async fn test_non_html_and_editor_requests_untouched() {
    let cache = pipelines(rules());

    let (_, json) = get_page(site(cache.clone()), "/api", None).await;
    assert!(json.contains("googletagmanager"));
    assert!(!json.contains("text/plain"));

    let (_, admin) = get_page(site(cache.clone()), "/wp-admin/edit.php", None).await;
    assert_eq!(admin, PAGE);

    let (_, builder) = get_page(site(cache), "/?et_fb=1", None).await;
    assert_eq!(builder, PAGE);
}

#[tokio::test]
async fn test_nested_middleware_rewrites_once() {
    let cache = pipelines(rules());
    let app = site(cache.clone()).layer(axum::middleware::from_fn_with_state(
        cache.clone(),
        consent_middleware,
    ));

    let (_, body) = get_page(app, "/", None).await;
    assert_eq!(body.matches("dcc-iframe-placeholder").count(), 1);
    assert_eq!(cache.metrics().snapshot().intercepted, 1);
}

fn app_state(rule_source: Arc<dyn RuleSource>) -> AppState {
    let mut config = ProxyConfig::default();
    config.backend_url = "https://www.example.org".into();
    AppState::from_parts(
        config,
        rule_source,
        Arc::new(MemoryConsentStore::new()),
        PrometheusBuilder::new().build_recorder().handle(),
    )
    .unwrap()
}

#[tokio::test]
async fn test_health_endpoints() {
    let state = app_state(Arc::new(StaticRuleSource::new(rules())));

    let (parts, body) = get_page(routes::create_router(state.clone()), "/health", None).await;
    assert_eq!(parts.status, StatusCode::OK);
    assert_eq!(body, "OK");

    let (parts, body) = get_page(routes::create_router(state), "/health/stats", None).await;
    assert_eq!(parts.status, StatusCode::OK);
    let stats: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(stats["rules"], 2);
    assert_eq!(stats["version_hash"], version_hash());
    assert_eq!(stats["metrics"]["intercepted"], 0);
}

#[tokio::test]
async fn test_rejects_unsafe_upstream() {
    let mut config = ProxyConfig::default();
    config.backend_url = "http://169.254.169.254/latest".into();
    let result = AppState::from_parts(
        config,
        Arc::new(StaticRuleSource::default()),
        Arc::new(MemoryConsentStore::new()),
        PrometheusBuilder::new().build_recorder().handle(),
    );
    assert!(result.is_err());
}

#[tokio::test]
async fn test_forwards_and_rewrites_upstream_page() {
    let upstream = Router::new().route("/article", get(|| async { Html(PAGE) }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, upstream).await.unwrap();
    });

    let mut config = ProxyConfig::default();
    config.backend_url = format!("http://{addr}");
    config.security.allow_http = true;
    config.security.allow_private_backend = true;
    let state = AppState::from_parts(
        config,
        Arc::new(StaticRuleSource::new(rules())),
        Arc::new(MemoryConsentStore::new()),
        PrometheusBuilder::new().build_recorder().handle(),
    )
    .unwrap();

    let (parts, body) = get_page(routes::create_router(state), "/article", None).await;
    assert_eq!(parts.status, StatusCode::OK);
    assert!(body.contains(r#"data-cookiecategory="marketing""#));
    assert!(body.contains(r#"type="text/plain""#));
}
