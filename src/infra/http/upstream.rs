//! Client for the origin that generates pages.

use axum::{
    body::{Body, to_bytes},
    extract::State,
    http::{HeaderMap, HeaderName, Request, StatusCode, header},
    response::{IntoResponse, Response},
};
use reqwest::{Client, Url, redirect::Policy};
use tracing::{debug, instrument};

use crate::{application::error::HttpError, config::UpstreamSettings, infra::error::InfraError};

const MAX_FORWARDED_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Headers that describe a single connection and must not be forwarded.
const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

#[derive(Clone, Debug)]
pub struct UpstreamClient {
    client: Client,
    origin: Url,
}

impl UpstreamClient {
    pub fn new(settings: &UpstreamSettings) -> Result<Self, InfraError> {
        let client = Client::builder()
            .user_agent(concat!("blobcache/", env!("CARGO_PKG_VERSION")))
            .redirect(Policy::none())
            .timeout(settings.timeout)
            .build()
            .map_err(|err| InfraError::upstream(format!("failed to build client: {err}")))?;

        Ok(Self {
            client,
            origin: settings.origin.clone(),
        })
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    /// Replay `request` against the origin and stream back its answer
    /// verbatim, redirects included. The `Host` header is kept so the origin renders
    /// links for the public site.
    #[instrument(skip_all, fields(method = %request.method(), path = %request.uri().path()))]
    pub async fn forward(&self, request: Request<Body>) -> Result<Response, HttpError> {
        let (parts, body) = request.into_parts();
        let target = parts
            .uri
            .path_and_query()
            .map_or("/", |value| value.as_str());
        let url = self.origin.join(target).map_err(|err| {
            HttpError::from_error(
                "infra::http::upstream::forward",
                StatusCode::BAD_REQUEST,
                "Invalid request target",
                &err,
            )
        })?;

        let body = to_bytes(body, MAX_FORWARDED_BODY_BYTES)
            .await
            .map_err(|err| {
                HttpError::from_error(
                    "infra::http::upstream::forward",
                    StatusCode::PAYLOAD_TOO_LARGE,
                    "Request body too large",
                    &err,
                )
            })?;

        // Stored pages are kept in identity encoding.
        let mut headers = parts.headers;
        strip_hop_by_hop(&mut headers);
        headers.remove(header::CONTENT_LENGTH);
        headers.remove(header::ACCEPT_ENCODING);

        let upstream = self
            .client
            .request(parts.method, url)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(upstream_error)?;

        let status = upstream.status();
        let mut headers = upstream.headers().clone();
        strip_hop_by_hop(&mut headers);
        debug!(
            status = status.as_u16(),
            length = ?upstream.content_length(),
            "origin responded"
        );

        // Streamed; the cache layer decides how much of it to hold.
        let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}

fn upstream_error(err: reqwest::Error) -> HttpError {
    let status = if err.is_timeout() {
        StatusCode::GATEWAY_TIMEOUT
    } else {
        StatusCode::BAD_GATEWAY
    };
    HttpError::from_error(
        "infra::http::upstream::forward",
        status,
        "Upstream unavailable",
        &err,
    )
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in HOP_BY_HOP.iter().chain(listed.iter()) {
        headers.remove(name);
    }
}

/// Fallback handler of the public router.
pub(super) async fn proxy_to_upstream(
    State(upstream): State<UpstreamClient>,
    request: Request<Body>,
) -> Response {
    match upstream.forward(request).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}
