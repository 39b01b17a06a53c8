use std::{sync::Arc, time::Duration};

use axum::{
    Router,
    body::Body,
    http::{HeaderMap, Request, StatusCode, header},
    response::{IntoResponse, Redirect},
    routing::get,
};
use blobcache::{
    cache::{
        CACHE_STATUS_HEADER, CacheConfig, CacheCoordinator, CachePolicy, CacheState,
        MemoryBlobStore,
    },
    config::UpstreamSettings,
    infra::http::{UpstreamClient, build_router},
};
use http_body_util::BodyExt;
use tower::ServiceExt;
use url::Url;

async fn spawn_origin() -> Url {
    let origin = Router::new()
        .route(
            "/echo-host",
            get(|headers: HeaderMap| async move {
                let host = headers
                    .get(header::HOST)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("")
                    .to_string();
                ([(header::CONTENT_TYPE, "text/plain")], host)
            }),
        )
        .route("/old", get(|| async { Redirect::permanent("/new") }))
        .route(
            "/down",
            get(|| async { StatusCode::SERVICE_UNAVAILABLE.into_response() }),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind origin");
    let addr = listener.local_addr().expect("origin addr");
    tokio::spawn(async move {
        axum::serve(listener, origin).await.expect("origin server");
    });
    Url::parse(&format!("http://{addr}")).expect("origin url")
}

async fn proxy() -> Router {
    let origin = spawn_origin().await;
    let upstream = UpstreamClient::new(&UpstreamSettings {
        origin,
        timeout: Duration::from_secs(5),
    })
    .expect("client");
    let coordinator = Arc::new(CacheCoordinator::new(
        Arc::new(MemoryBlobStore::new()),
        CachePolicy::new(CacheConfig::default()),
        "pages",
    ));
    build_router(CacheState::new(coordinator), upstream)
}

fn public_request(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::HOST, "blog.example.com")
        .body(Body::empty())
        .expect("request should build")
}

#[tokio::test]
async fn origin_sees_public_host_and_result_is_cached() {
    let app = proxy().await;

    for expected in ["miss", "hit"] {
        let response = app
            .clone()
            .oneshot(public_request("/echo-host"))
            .await
            .expect("router should respond");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get(CACHE_STATUS_HEADER)
                .and_then(|value| value.to_str().ok()),
            Some(expected)
        );
        let body = response.into_body().collect().await.expect("body").to_bytes();
        assert_eq!(&body[..], b"blog.example.com");
    }
}

#[tokio::test]
async fn redirects_are_passed_through_uncached() {
    let app = proxy().await;

    let response = app
        .oneshot(public_request("/old"))
        .await
        .expect("router should respond");
    assert_eq!(response.status(), StatusCode::PERMANENT_REDIRECT);
    assert_eq!(
        response
            .headers()
            .get(header::LOCATION)
            .and_then(|value| value.to_str().ok()),
        Some("/new")
    );
}

#[tokio::test]
async fn origin_errors_are_not_cached() {
    let app = proxy().await;

    for _ in 0..2 {
        let response = app
            .clone()
            .oneshot(public_request("/down"))
            .await
            .expect("router should respond");
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            response
                .headers()
                .get(CACHE_STATUS_HEADER)
                .and_then(|value| value.to_str().ok()),
            Some("miss")
        );
    }
}
