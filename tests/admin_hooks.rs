use std::sync::Arc;

use axum::{
    body::Body,
    http::{HeaderMap, Method, Request, StatusCode, header::CONTENT_TYPE},
};
use blobcache::{
    cache::{
        BlobStore, CacheConfig, CacheCoordinator, CachePolicy, CacheState, MemoryBlobStore,
        derive_key,
    },
    infra::http::{InvalidationReport, build_admin_router},
};
use bytes::Bytes;
use http_body_util::BodyExt;
use tower::ServiceExt;

fn admin() -> (axum::Router, Arc<MemoryBlobStore>, Arc<CacheCoordinator>) {
    let store = Arc::new(MemoryBlobStore::new());
    let coordinator = Arc::new(CacheCoordinator::new(
        store.clone(),
        CachePolicy::new(CacheConfig::default()),
        "pages",
    ));
    let router = build_admin_router(CacheState::new(Arc::clone(&coordinator)));
    (router, store, coordinator)
}

fn content_saved(body: &'static str) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri("/hooks/content-saved")
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .expect("request should build")
}

#[tokio::test]
async fn health_reports_no_content() {
    let (router, _, _) = admin();
    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .expect("request should build");
    let response = router.oneshot(request).await.expect("router should respond");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn content_saved_hook_invalidates_every_variant() {
    let (router, store, coordinator) = admin();
    let desktop = derive_key("https", "example.com", "/blog/post-1/", None, false);
    let mobile = derive_key("https", "example.com", "/blog/post-1/", None, true);
    for key in [&desktop, &mobile] {
        coordinator
            .store(key, StatusCode::OK, &HeaderMap::new(), Bytes::from_static(b"page"))
            .await
            .expect("stored");
    }

    let response = router
        .oneshot(content_saved(r#"{"url":"https://example.com/blog/post-1/"}"#))
        .await
        .expect("router should respond");
    assert_eq!(response.status(), StatusCode::OK);

    let body = response.into_body().collect().await.expect("body").to_bytes();
    let report: InvalidationReport = serde_json::from_slice(&body).expect("json report");
    assert_eq!(report, InvalidationReport { removed: 2 });
    assert!(!store.exists("pages", desktop.as_str()).await.expect("exists"));
    assert!(!store.exists("pages", mobile.as_str()).await.expect("exists"));
}

#[tokio::test]
async fn content_saved_hook_rejects_relative_urls() {
    let (router, _, _) = admin();
    let response = router
        .oneshot(content_saved(r#"{"url":"/blog/post-1/"}"#))
        .await
        .expect("router should respond");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
